use std::sync::{Arc, Mutex, MutexGuard};

/// Simulated device memory: a contiguous block of holding registers starting
/// at address 0.
///
/// Every write and read happens under a single lock, so a reader never
/// observes a partially updated block.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    holding: Arc<Mutex<Vec<u16>>>,
}

/// Address range outside the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalAddress {
    pub address: u16,
    pub count: u16,
}

impl RegisterBank {
    pub fn new(len: u16) -> Self {
        Self {
            holding: Arc::new(Mutex::new(vec![0; usize::from(len)])),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes `values` starting at `address` as one atomic update.
    pub fn set_registers(&self, address: u16, values: &[u16]) -> Result<(), IllegalAddress> {
        let count = u16::try_from(values.len()).map_err(|_| IllegalAddress {
            address,
            count: u16::MAX,
        })?;
        let mut holding = self.lock();
        let range = span(address, values.len(), holding.len()).ok_or(IllegalAddress { address, count })?;
        holding[range].copy_from_slice(values);
        Ok(())
    }

    pub fn read_registers(&self, address: u16, count: u16) -> Result<Vec<u16>, IllegalAddress> {
        let holding = self.lock();
        let range = span(address, usize::from(count), holding.len()).ok_or(IllegalAddress { address, count })?;
        Ok(holding[range].to_vec())
    }

    // copy_from_slice cannot leave a half-written block, so a poisoned lock
    // still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, Vec<u16>> {
        self.holding.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn span(address: u16, count: usize, len: usize) -> Option<std::ops::Range<usize>> {
    let start = usize::from(address);
    let end = start.checked_add(count)?;
    (count > 0 && end <= len).then_some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_block() {
        let bank = RegisterBank::new(3);
        bank.set_registers(0, &[215, 480, 1]).unwrap();
        assert_eq!(bank.read_registers(0, 3).unwrap(), vec![215, 480, 1]);
        assert_eq!(bank.read_registers(1, 2).unwrap(), vec![480, 1]);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let bank = RegisterBank::new(3);
        assert!(bank.read_registers(2, 2).is_err());
        assert!(bank.read_registers(0, 0).is_err());
        assert!(bank.set_registers(3, &[1]).is_err());
        assert!(bank.set_registers(u16::MAX, &[1, 2]).is_err());
        assert_eq!(bank.read_registers(0, 3).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_oversized_write_is_rejected() {
        let bank = RegisterBank::new(u16::MAX);
        let values = vec![7; usize::from(u16::MAX) + 1];
        assert_eq!(
            bank.set_registers(0, &values),
            Err(IllegalAddress {
                address: 0,
                count: u16::MAX
            })
        );
        assert_eq!(bank.read_registers(0, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_block() {
        let bank = RegisterBank::new(3);
        let writer = {
            let bank = bank.clone();
            std::thread::spawn(move || {
                for i in 0..2000u16 {
                    bank.set_registers(0, &[i, i, i]).unwrap();
                }
            })
        };
        for _ in 0..2000 {
            let block = bank.read_registers(0, 3).unwrap();
            assert!(block.iter().all(|v| *v == block[0]), "torn read: {block:?}");
        }
        writer.join().unwrap();
    }
}
