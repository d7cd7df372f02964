//! In-memory PLC used by unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::DataItem;
use crate::config::DeviceConfig;
use crate::error::{ItemError, Result, S7Error};
use crate::memory::ElementSize;
use crate::registry::{Connection, Connector};

const DB_SIZE: usize = 1024;

#[derive(Default)]
struct PlcState {
    blocks: HashMap<u16, Vec<u8>>,
    connects: usize,
    fail_connects: u32,
    pass_transactions: u32,
    fail_transactions: u32,
    reject: Option<(u8, u8)>,
    item_errors: HashMap<(u16, u32), ItemError>,
    transactions: Vec<Vec<DataItem>>,
    attempts: Vec<usize>,
}

impl PlcState {
    fn block(&mut self, db: u16) -> &mut Vec<u8> {
        self.blocks.entry(db).or_insert_with(|| vec![0; DB_SIZE])
    }

    fn begin(&mut self, items: &[DataItem]) -> Result<()> {
        self.attempts.push(items.len());
        if self.pass_transactions > 0 {
            self.pass_transactions -= 1;
        } else if self.fail_transactions > 0 {
            self.fail_transactions -= 1;
            return Err(S7Error::ConnectionClosed);
        }
        if let Some((class, code)) = self.reject.take() {
            return Err(S7Error::plc_error(class, code));
        }
        self.transactions.push(items.to_vec());
        Ok(())
    }
}

/// Connector handing out sessions onto one shared in-memory PLC.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<PlcState>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` connects fail.
    pub(crate) fn fail_connects(&self, n: u32) {
        self.state.lock().fail_connects = n;
    }

    /// Makes the next `n` transactions fail with a closed connection.
    pub(crate) fn fail_transactions(&self, n: u32) {
        self.fail_transactions_after(0, n);
    }

    /// Lets `skip` transactions through, then fails the following `n`.
    pub(crate) fn fail_transactions_after(&self, skip: u32, n: u32) {
        let mut state = self.state.lock();
        state.pass_transactions = skip;
        state.fail_transactions = n;
    }

    /// Makes the next transaction fail with a PLC header error.
    pub(crate) fn reject_next(&self, class: u8, code: u8) {
        self.state.lock().reject = Some((class, code));
    }

    /// Reports `error` for every item addressing `db` at wire start `start`.
    pub(crate) fn item_error(&self, db: u16, start: u32, error: ItemError) {
        self.state.lock().item_errors.insert((db, start), error);
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Item count of every completed transaction, in order.
    pub(crate) fn transactions(&self) -> Vec<usize> {
        self.state.lock().transactions.iter().map(Vec::len).collect()
    }

    /// Item count of every attempted transaction, failed ones included.
    pub(crate) fn attempts(&self) -> Vec<usize> {
        self.state.lock().attempts.clone()
    }

    /// Items of completed transaction `n` as they were sent.
    pub(crate) fn sent_items(&self, n: usize) -> Vec<DataItem> {
        self.state.lock().transactions[n].clone()
    }

    pub(crate) fn peek(&self, db: u16, offset: usize, len: usize) -> Vec<u8> {
        self.state.lock().block(db)[offset..offset + len].to_vec()
    }

    pub(crate) fn poke(&self, db: u16, offset: usize, bytes: &[u8]) {
        self.state.lock().block(db)[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(&self, _device: &str, _config: &DeviceConfig) -> Result<MockConnection> {
        let mut state = self.state.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(S7Error::IsoConnectionFailed);
        }
        state.connects += 1;
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }
}

pub(crate) struct MockConnection {
    state: Arc<Mutex<PlcState>>,
}

impl Connection for MockConnection {
    fn read_multi(&mut self, items: &mut [DataItem]) -> Result<()> {
        let mut state = self.state.lock();
        state.begin(items)?;
        for item in items.iter_mut() {
            item.error = state.item_errors.get(&(item.db_number, item.start)).copied();
            if item.error.is_some() {
                continue;
            }
            let byte = (item.start / 8) as usize;
            let block = state.block(item.db_number);
            item.data = [0; 4];
            match item.size {
                ElementSize::Bit => item.data[0] = (block[byte] >> (item.start % 8)) & 1,
                size => {
                    let len = size.byte_len();
                    item.data[..len].copy_from_slice(&block[byte..byte + len]);
                }
            }
        }
        Ok(())
    }

    fn write_multi(&mut self, items: &mut [DataItem]) -> Result<()> {
        let mut state = self.state.lock();
        state.begin(items)?;
        for item in items.iter_mut() {
            item.error = state.item_errors.get(&(item.db_number, item.start)).copied();
            if item.error.is_some() {
                continue;
            }
            let byte = (item.start / 8) as usize;
            let block = state.block(item.db_number);
            match item.size {
                ElementSize::Bit => {
                    let mask = 1u8 << (item.start % 8);
                    if item.data[0] & 1 == 1 {
                        block[byte] |= mask;
                    } else {
                        block[byte] &= !mask;
                    }
                }
                size => {
                    let len = size.byte_len();
                    block[byte..byte + len].copy_from_slice(&item.data[..len]);
                }
            }
        }
        Ok(())
    }
}
