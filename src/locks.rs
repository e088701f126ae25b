//! Cached lock state of the device's buttons and axes.
//!
//! Lock changes are applied to the cache optimistically once the command is
//! written. The cache is never invalidated behind the caller's back; if
//! something else reconfigures the device, call [`LockStateCache::invalidate`].

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ErrorKind, Result};
use crate::proto::format::{format_command, parse_lock_state};
use crate::proto::DeviceCommand;
use crate::transport::CommandSink;

pub use crate::proto::command::LockTarget;

pub const QUERY_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Clone, Copy)]
struct LockState {
    bits: u8,
    valid: bool,
}

impl LockState {
    fn store(&mut self, target: LockTarget, locked: bool) {
        let bit = 1 << target.bit();
        if locked {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }

    fn get(&self, target: LockTarget) -> bool {
        self.bits & (1 << target.bit()) != 0
    }
}

#[derive(Debug, Default)]
pub struct LockStateCache {
    state: Mutex<LockState>,
}

impl LockStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lock(&self, sink: &dyn CommandSink, target: LockTarget, locked: bool) -> Result<()> {
        let cmd = format_command(&DeviceCommand::Lock { target, locked })?;
        sink.send_command(&cmd, false, None)?;
        let mut st = self.state.lock();
        st.store(target, locked);
        st.valid = true;
        debug!(%target, locked, "lock set");
        Ok(())
    }

    /// Cached state when valid; otherwise one round trip to the device.
    pub fn query_lock(&self, sink: &dyn CommandSink, target: LockTarget) -> Result<bool> {
        {
            let st = self.state.lock();
            if st.valid {
                return Ok(st.get(target));
            }
        }
        let locked = query(sink, target)?;
        let mut st = self.state.lock();
        st.store(target, locked);
        st.valid = true;
        Ok(locked)
    }

    /// State of every target. A target whose query times out reads as
    /// unlocked, and the cache is only marked valid when all seven answered.
    pub fn query_all(&self, sink: &dyn CommandSink) -> Result<BTreeMap<LockTarget, bool>> {
        {
            let st = self.state.lock();
            if st.valid {
                return Ok(LockTarget::ALL.iter().map(|t| (*t, st.get(*t))).collect());
            }
        }

        let mut states = BTreeMap::new();
        let mut complete = true;
        for target in LockTarget::ALL {
            let locked = match query(sink, target) {
                Ok(locked) => locked,
                Err(e) if e.kind() == ErrorKind::Timeout => {
                    warn!(%target, "lock query timed out");
                    complete = false;
                    false
                }
                Err(e) => return Err(e),
            };
            states.insert(target, locked);
        }

        let mut st = self.state.lock();
        for (target, locked) in &states {
            st.store(*target, *locked);
        }
        st.valid = complete;
        Ok(states)
    }

    pub fn invalidate(&self) {
        self.state.lock().valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.state.lock().valid
    }
}

fn query(sink: &dyn CommandSink, target: LockTarget) -> Result<bool> {
    let cmd = format_command(&DeviceCommand::QueryLock(target))?;
    let reply = sink.send_command(&cmd, true, Some(QUERY_TIMEOUT))?;
    Ok(parse_lock_state(&reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    /// Answers queries from a fixed lock mask and records traffic.
    #[derive(Default)]
    struct FakeDevice {
        locked: u8,
        silent: Option<LockTarget>,
        log: Mutex<Vec<(String, bool)>>,
    }

    impl FakeDevice {
        fn round_trips(&self) -> usize {
            self.log.lock().iter().filter(|(_, expect)| *expect).count()
        }
    }

    impl CommandSink for FakeDevice {
        fn send_command(
            &self,
            command: &str,
            expect_response: bool,
            _timeout: Option<Duration>,
        ) -> Result<String> {
            self.log.lock().push((command.to_string(), expect_response));
            if !expect_response {
                return Ok(String::new());
            }
            let target = LockTarget::ALL
                .into_iter()
                .find(|t| command == format!("km.lock_m{}()", t.command_suffix()))
                .ok_or_else(|| Error::Command(command.to_string()))?;
            if self.silent == Some(target) {
                return Err(Error::Timeout(command.to_string()));
            }
            let reply = if self.locked & (1 << target.bit()) != 0 { "1" } else { "0" };
            Ok(reply.to_string())
        }
    }

    #[test]
    fn set_then_query_hits_cache() {
        let dev = FakeDevice::default();
        let cache = LockStateCache::new();
        cache.set_lock(&dev, LockTarget::X, true).unwrap();
        assert!(cache.query_lock(&dev, LockTarget::X).unwrap());
        assert_eq!(dev.round_trips(), 0);
        assert_eq!(*dev.log.lock(), vec![("km.lock_mx(1)".to_string(), false)]);
    }

    #[test]
    fn invalidate_forces_one_round_trip() {
        let dev = FakeDevice {
            locked: 1 << LockTarget::Right.bit(),
            ..Default::default()
        };
        let cache = LockStateCache::new();
        cache.set_lock(&dev, LockTarget::Left, true).unwrap();
        cache.invalidate();
        assert!(!cache.is_valid());
        assert!(cache.query_lock(&dev, LockTarget::Right).unwrap());
        assert_eq!(dev.round_trips(), 1);
        assert!(cache.is_valid());
        // served from cache now
        assert!(cache.query_lock(&dev, LockTarget::Right).unwrap());
        assert_eq!(dev.round_trips(), 1);
    }

    #[test]
    fn unlock_clears_bit() {
        let dev = FakeDevice::default();
        let cache = LockStateCache::new();
        cache.set_lock(&dev, LockTarget::Y, true).unwrap();
        cache.set_lock(&dev, LockTarget::Y, false).unwrap();
        assert!(!cache.query_lock(&dev, LockTarget::Y).unwrap());
    }

    #[test]
    fn query_all_reads_every_target() {
        let dev = FakeDevice {
            locked: (1 << LockTarget::Middle.bit()) | (1 << LockTarget::Y.bit()),
            ..Default::default()
        };
        let cache = LockStateCache::new();
        let states = cache.query_all(&dev).unwrap();
        assert_eq!(states.len(), 7);
        assert!(states[&LockTarget::Middle]);
        assert!(states[&LockTarget::Y]);
        assert!(!states[&LockTarget::Left]);
        assert_eq!(dev.round_trips(), 7);
        assert!(cache.is_valid());
        cache.query_all(&dev).unwrap();
        assert_eq!(dev.round_trips(), 7);
    }

    #[test]
    fn query_all_with_silent_target_stays_invalid() {
        let dev = FakeDevice {
            locked: 1 << LockTarget::Side1.bit(),
            silent: Some(LockTarget::Side1),
            ..Default::default()
        };
        let cache = LockStateCache::new();
        let states = cache.query_all(&dev).unwrap();
        assert!(!states[&LockTarget::Side1]);
        assert!(!cache.is_valid());
    }

    #[test]
    fn failed_write_does_not_touch_cache() {
        struct Offline;
        impl CommandSink for Offline {
            fn send_command(&self, _: &str, _: bool, _: Option<Duration>) -> Result<String> {
                Err(Error::Connection("not connected".into()))
            }
        }
        let cache = LockStateCache::new();
        assert_eq!(
            cache.set_lock(&Offline, LockTarget::Left, true).unwrap_err().kind(),
            ErrorKind::Connection
        );
        assert!(!cache.is_valid());
        assert!(cache.query_lock(&Offline, LockTarget::Left).is_err());
    }
}
