//! Modbus TCP server exposing a [`RegisterBank`] as holding registers.
//!
//! The naming follows client/server rather than master/slave: the simulated
//! device is the server, pollers are clients.

use std::future;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};
use tracing::{debug, error, info};

use crate::bank::{IllegalAddress, RegisterBank};

/// Answers holding-register requests from a shared bank.
///
/// The unit identifier is not checked: one server fronts one device.
#[derive(Debug, Clone)]
pub struct HoldingRegisterService {
    bank: RegisterBank,
}

impl HoldingRegisterService {
    pub fn new(bank: RegisterBank) -> Self {
        Self { bank }
    }
}

impl tokio_modbus::server::Service for HoldingRegisterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => self
                .bank
                .read_registers(addr, cnt)
                .map(Response::ReadHoldingRegisters)
                .map_err(illegal_address),
            Request::WriteSingleRegister(addr, value) => self
                .bank
                .set_registers(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value))
                .map_err(illegal_address),
            Request::WriteMultipleRegisters(addr, values) => u16::try_from(values.len())
                .map_err(|_| IllegalAddress {
                    address: addr,
                    count: u16::MAX,
                })
                .and_then(|count| {
                    self.bank
                        .set_registers(addr, &values)
                        .map(|_| Response::WriteMultipleRegisters(addr, count))
                })
                .map_err(illegal_address),
            _ => {
                error!("Unsupported function code in request: {req:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

fn illegal_address(err: IllegalAddress) -> ExceptionCode {
    error!(
        "Illegal data address: {} registers at {}",
        err.count, err.address
    );
    ExceptionCode::IllegalDataAddress
}

/// Serves `bank` on `listener` until `shutdown` flips to `true` or its sender
/// is dropped.
pub async fn serve(
    listener: TcpListener,
    bank: RegisterBank,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Modbus TCP server listening on {}", addr);
    }

    let server = Server::new(listener);
    let on_connected = move |stream, socket_addr| {
        let bank = bank.clone();
        async move {
            accept_tcp_connection(stream, socket_addr, move |peer| {
                debug!("Modbus client connected from {}", peer);
                Ok(Some(HoldingRegisterService::new(bank.clone())))
            })
        }
    };
    let on_process_error = |err| {
        error!("Modbus connection error: {err}");
    };

    tokio::select! {
        result = server.serve(&on_connected, on_process_error) => result,
        _ = shutdown_requested(&mut shutdown) => {
            info!("Modbus TCP server stopped");
            Ok(())
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
