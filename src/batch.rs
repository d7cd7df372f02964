//! Batched execution of host read and write commands.
//!
//! One call runs through these steps:
//!
//! 1. every `NodeName` is resolved; a single failure aborts before any traffic
//! 2. items are split into requests of at most [`MAX_ITEMS_PER_REQUEST`]
//! 3. requests run one after another, each retried on transport failures
//!    with a fresh connection
//! 4. per-item return codes are checked once all requests went through
//! 5. read buffers are decoded in request order
//!
//! Earlier requests are not rolled back when a later one fails.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::address::{self, AddressDescriptor};
use crate::codec;
use crate::command::DataItem;
use crate::config::DeviceConfig;
use crate::error::{DriverError, DriverResult, ResourceFailure};
use crate::registry::{Connection, ConnectionRegistry, Connector};
use crate::value::{CommandRequest, CommandValue};

/// Items sent in one read or write request.
pub const MAX_ITEMS_PER_REQUEST: usize = 16;

/// Retry behaviour for one request.
///
/// The delay before attempt `n + 1` is `initial_backoff * multiplier^(n - 1)`,
/// capped at `max_backoff`. The default retries immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per request, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound of any delay.
    pub max_backoff: Duration,
    /// Growth factor between delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Sets the number of attempts; values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the first delay and the cap.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    ///
    /// # Example
    ///
    /// ```
    /// use s7_driver::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default()
    ///     .with_backoff(Duration::from_millis(100), Duration::from_millis(300));
    /// assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
    /// assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
    /// assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
    /// ```
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_backoff.as_nanos() as f64 {
            return self.max_backoff;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

/// Runs the commands of one host call against one device.
pub struct BatchExecutor<'a, K: Connector> {
    registry: &'a ConnectionRegistry<K>,
    policy: &'a RetryPolicy,
    device: &'a str,
    config: &'a DeviceConfig,
}

impl<'a, K: Connector> BatchExecutor<'a, K> {
    /// Creates an executor for `device`.
    pub fn new(
        registry: &'a ConnectionRegistry<K>,
        policy: &'a RetryPolicy,
        device: &'a str,
        config: &'a DeviceConfig,
    ) -> Self {
        Self {
            registry,
            policy,
            device,
            config,
        }
    }

    /// Reads every requested resource.
    ///
    /// The result is aligned with `requests`; a value that cannot be decoded
    /// as its declared type is logged and left `None`.
    ///
    /// # Errors
    ///
    /// - `DriverError::Address` if any address does not resolve
    /// - `DriverError::Transport` once a request exhausts its attempts
    /// - `DriverError::Plc` if the PLC refuses a request
    /// - `DriverError::Protocol` if any item reports an error code
    pub fn read(&self, requests: &[CommandRequest]) -> DriverResult<Vec<Option<CommandValue>>> {
        let descriptors = self.resolve(requests)?;
        let mut items: Vec<DataItem> = descriptors.iter().map(DataItem::from_descriptor).collect();

        let names: Vec<&str> = requests.iter().map(|r| r.resource_name.as_str()).collect();
        self.transact_all(Direction::Read, &names, &mut items)?;
        self.check_items(&names, &items)?;

        Ok(requests
            .iter()
            .zip(&items)
            .map(|(request, item)| self.decode(request, item))
            .collect())
    }

    /// Writes `values[i]` to `requests[i]`.
    ///
    /// Values that cannot be encoded for their resource are logged and
    /// skipped; the rest are still written.
    ///
    /// Requests are not split further by PDU size. A full chunk of
    /// [`MAX_ITEMS_PER_REQUEST`] items needs more than the 240-byte PDU many
    /// S7-300 and S7-1200 CPUs negotiate and fails with
    /// [`S7Error::PduTooLarge`](crate::S7Error::PduTooLarge) as a
    /// `DriverError::Plc`, without being retried.
    ///
    /// # Errors
    ///
    /// `DriverError::Request` if the slices differ in length, otherwise the
    /// same as [`BatchExecutor::read`].
    pub fn write(&self, requests: &[CommandRequest], values: &[CommandValue]) -> DriverResult<()> {
        if requests.len() != values.len() {
            return Err(DriverError::request(
                self.device,
                format!("{} requests but {} values", requests.len(), values.len()),
            ));
        }
        let descriptors = self.resolve(requests)?;

        let mut names = Vec::with_capacity(requests.len());
        let mut items = Vec::with_capacity(requests.len());
        for ((request, value), descriptor) in requests.iter().zip(values).zip(&descriptors) {
            match codec::encode(&value.value, request.value_type, descriptor.element_size) {
                Ok(buffer) => {
                    names.push(request.resource_name.as_str());
                    items.push(DataItem::from_descriptor(descriptor).with_data(buffer));
                }
                Err(e) => warn!(
                    device = self.device,
                    resource = %request.resource_name,
                    error = %e,
                    "value not written"
                ),
            }
        }
        if items.is_empty() {
            debug!(device = self.device, "nothing left to write");
            return Ok(());
        }

        self.transact_all(Direction::Write, &names, &mut items)?;
        self.check_items(&names, &items)
    }

    fn resolve(&self, requests: &[CommandRequest]) -> DriverResult<Vec<AddressDescriptor>> {
        let mut resolved = Vec::with_capacity(requests.len());
        let mut failures = Vec::new();
        for request in requests {
            match address::parse(request.node_name().unwrap_or_default()) {
                Ok(descriptor) => resolved.push(descriptor),
                Err(e) => failures.push(ResourceFailure::new(&request.resource_name, e)),
            }
        }
        if failures.is_empty() {
            return Ok(resolved);
        }
        warn!(
            device = self.device,
            failed = failures.len(),
            "address resolution failed, nothing sent"
        );
        Err(DriverError::Address {
            device: self.device.to_owned(),
            failures,
        })
    }

    fn transact_all(
        &self,
        direction: Direction,
        names: &[&str],
        items: &mut [DataItem],
    ) -> DriverResult<()> {
        let chunks = items
            .chunks_mut(MAX_ITEMS_PER_REQUEST)
            .zip(names.chunks(MAX_ITEMS_PER_REQUEST));
        for (index, (chunk, chunk_names)) in chunks.enumerate() {
            debug!(
                device = self.device,
                chunk = index,
                items = chunk.len(),
                ?direction,
                "sending request"
            );
            self.transact(direction, chunk_names, chunk)?;
        }
        Ok(())
    }

    fn transact(
        &self,
        direction: Direction,
        names: &[&str],
        chunk: &mut [DataItem],
    ) -> DriverResult<()> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.registry.get_or_create(self.device, self.config) {
                Ok(conn) => {
                    let mut conn = conn.lock();
                    match direction {
                        Direction::Read => conn.read_multi(chunk),
                        Direction::Write => conn.write_multi(chunk),
                    }
                }
                Err(e) => Err(e),
            };

            let e = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if e.is_transport() {
                self.registry.invalidate(self.device);
            }
            if !e.is_transport() || attempt >= max_attempts {
                error!(device = self.device, attempts = attempt, error = %e, "request failed");
                let resources = names.iter().map(|&name| name.to_owned()).collect();
                return Err(DriverError::from_client(self.device, resources, attempt, e));
            }

            warn!(device = self.device, attempt, error = %e, "request failed, reconnecting");
            let delay = self.policy.backoff_for(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }

    fn check_items(&self, names: &[&str], items: &[DataItem]) -> DriverResult<()> {
        let failures: Vec<_> = names
            .iter()
            .copied()
            .zip(items)
            .filter_map(|(name, item)| item.error.map(|e| ResourceFailure::new(name, e)))
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(DriverError::Protocol {
            device: self.device.to_owned(),
            failures,
        })
    }

    fn decode(&self, request: &CommandRequest, item: &DataItem) -> Option<CommandValue> {
        match codec::decode(&item.data, item.size, request.value_type) {
            Ok(value) => Some(CommandValue::new(&request.resource_name, value)),
            Err(e) => {
                warn!(
                    device = self.device,
                    resource = %request.resource_name,
                    error = %e,
                    "value not decoded"
                );
                None
            }
        }
    }
}
