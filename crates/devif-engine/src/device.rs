//! The device handle: a transport, an interface tree and policy behind one
//! reentrant lock.
//!
//! Every public operation holds the lock for its full duration. The lock is
//! reentrant so that retry callbacks and explicit [`Device::lock`] sections can
//! call back into the device from the owning thread.

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::sync::Arc;

use devif_model::prelude::*;
use devif_model::value::parse_int_literal;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::executor::{self, Call};
use crate::modes::{Modes, PolicyState, Timeout};
use crate::resolver::{self, AddressKind, RegId, TermId};
use crate::retry::{AttemptLimit, RetryPolicy};
use crate::transport::Transport;

pub(crate) struct DeviceState {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) interface: Tree,
    pub(crate) policy: PolicyState,
    retrying: bool,
    closed: bool,
}

impl DeviceState {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Communication("device is closed".into()).into());
        }
        Ok(())
    }
}

/// A register-addressed device.
pub struct Device {
    inner: ReentrantMutex<RefCell<DeviceState>>,
}

/// Holds the device lock until dropped.
///
/// The owning thread may keep using the device while the guard is alive;
/// other threads block on their next call.
#[must_use = "the device is unlocked as soon as the guard is dropped"]
pub struct DeviceLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<DeviceState>>,
}

/// Clears the retrying flag when the policy callback returns or unwinds.
pub(crate) struct RetryScope<'a> {
    device: &'a Device,
    policy: Arc<dyn RetryPolicy>,
}

impl RetryScope<'_> {
    pub(crate) fn policy(&self) -> &dyn RetryPolicy {
        self.policy.as_ref()
    }
}

impl Drop for RetryScope<'_> {
    fn drop(&mut self) {
        let guard = self.device.inner.lock();
        if let Ok(mut state) = guard.try_borrow_mut() {
            state.retrying = false;
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").finish_non_exhaustive()
    }
}

impl Device {
    /// Open a device over `transport` described by `interface`.
    pub fn new(transport: impl Transport + 'static, interface: Tree) -> Self {
        let name = interface
            .name(interface.root())
            .unwrap_or_default()
            .to_string();
        info!(interface = %name, "device opened");
        Self {
            inner: ReentrantMutex::new(RefCell::new(DeviceState {
                transport: Box::new(transport),
                interface,
                policy: PolicyState::default(),
                retrying: false,
                closed: false,
            })),
        }
    }

    /// Open a device and apply `config`.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if a terminal named in `config` is not in the
    /// interface, or an interface validation error for an invalid config.
    pub fn with_config(transport: impl Transport + 'static, interface: Tree, config: &DeviceConfig) -> Result<Self> {
        config.validate()?;
        let device = Self::new(transport, interface);
        device.with_state(|s| {
            let mut overrides = Vec::with_capacity(config.terminal_modes.len());
            for (key, modes) in &config.terminal_modes {
                overrides.push((config_terminal_addr(&s.interface, key)?, *modes));
            }
            s.policy.timeout_ms = config.default_timeout_ms;
            s.policy.modes = config.modes;
            for (addr, modes) in overrides {
                *s.policy.terminal_modes.entry(addr).or_default() |= modes;
            }
            s.policy.retry = Arc::new(AttemptLimit(config.retry_limit));
            Ok(())
        })?;
        Ok(device)
    }

    /// Take the device lock for a multi-call critical section.
    pub fn lock(&self) -> DeviceLock<'_> {
        DeviceLock {
            _guard: self.inner.lock(),
        }
    }

    /// Run `f` with the state borrowed, under the lock.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> Result<R>) -> Result<R> {
        let guard = self.inner.lock();
        let mut state: RefMut<'_, DeviceState> = guard
            .try_borrow_mut()
            .map_err(|e| Error::operation(format!("device state is busy: {e}")))?;
        f(&mut state)
    }

    /// Mark a retry callback as running and hand out the policy.
    ///
    /// Fails if a callback is already running on this device.
    pub(crate) fn begin_retry(&self) -> Result<RetryScope<'_>> {
        let policy = self.with_state(|s| {
            if s.retrying {
                return Err(Error::operation(
                    "retry requested while a retry callback is running",
                ));
            }
            s.retrying = true;
            Ok(Arc::clone(&s.policy.retry))
        })?;
        Ok(RetryScope {
            device: self,
            policy,
        })
    }

    fn resolve(&self, term: &TermId, reg: &RegId, width: Option<usize>) -> Result<resolver::AddressSet> {
        self.with_state(|s| resolver::resolve(&s.interface, term, reg, width))
    }

    // ----------------------------------------------------------- transfers

    /// Read a register, array, element or sub-register.
    ///
    /// # Errors
    ///
    /// Returns resolution errors, transport errors, or an operation error
    /// when verification fails and the retry policy gives up.
    pub fn get(&self, term: impl Into<TermId>, reg: impl Into<RegId>, timeout: impl Into<Timeout>) -> Result<Value> {
        self.get_inner(&term.into(), &reg.into(), None, timeout.into())
    }

    /// [`Device::get`] with an explicit transfer width in bytes.
    ///
    /// # Errors
    ///
    /// Same as [`Device::get`].
    pub fn get_with_width(
        &self,
        term: impl Into<TermId>,
        reg: impl Into<RegId>,
        width: usize,
        timeout: impl Into<Timeout>,
    ) -> Result<Value> {
        self.get_inner(&term.into(), &reg.into(), Some(width), timeout.into())
    }

    fn get_inner(&self, term: &TermId, reg: &RegId, width: Option<usize>, timeout: Timeout) -> Result<Value> {
        let _lock = self.lock();
        let target = self.resolve(term, reg, width)?;
        debug!(%term, %reg, kind = ?target.kind, words = target.addrs.len(), "get");
        let call = Call::new(self, target.term_addr, timeout)?;
        executor::get(&call, &target)
    }

    /// Write a register, array, element or sub-register.
    ///
    /// Arrays take a list with one value per element. A node-valued value
    /// updates the named sub-registers of a register in one read-modify-write.
    /// Strings are looked up in the target's value map.
    ///
    /// # Errors
    ///
    /// Returns resolution errors, `InvalidType` for a wrongly shaped value,
    /// `AttrNotFound` for an unknown symbolic value, transport errors, or an
    /// operation error when verification fails and the retry policy gives up.
    pub fn set(
        &self,
        term: impl Into<TermId>,
        reg: impl Into<RegId>,
        value: impl Into<Value>,
        timeout: impl Into<Timeout>,
    ) -> Result<()> {
        self.set_inner(&term.into(), &reg.into(), None, &value.into(), timeout.into())
    }

    /// [`Device::set`] with an explicit transfer width in bytes.
    ///
    /// # Errors
    ///
    /// Same as [`Device::set`].
    pub fn set_with_width(
        &self,
        term: impl Into<TermId>,
        reg: impl Into<RegId>,
        width: usize,
        value: impl Into<Value>,
        timeout: impl Into<Timeout>,
    ) -> Result<()> {
        self.set_inner(&term.into(), &reg.into(), Some(width), &value.into(), timeout.into())
    }

    fn set_inner(&self, term: &TermId, reg: &RegId, width: Option<usize>, value: &Value, timeout: Timeout) -> Result<()> {
        let _lock = self.lock();
        let target = self.resolve(term, reg, width)?;
        debug!(%term, %reg, kind = ?target.kind, words = target.addrs.len(), %value, "set");
        let call = Call::new(self, target.term_addr, timeout)?;
        executor::set(&call, &target, value)
    }

    /// Read `len` raw bytes starting at a register.
    ///
    /// # Errors
    ///
    /// Returns resolution or transport errors, or an operation error when
    /// status/checksum verification fails and the retry policy gives up.
    pub fn read(
        &self,
        term: impl Into<TermId>,
        reg: impl Into<RegId>,
        len: usize,
        timeout: impl Into<Timeout>,
    ) -> Result<Vec<u8>> {
        let (term, reg) = (term.into(), reg.into());
        let _lock = self.lock();
        let target = self.resolve(&term, &reg, None)?;
        debug!(%term, %reg, len, "read");
        let call = Call::new(self, target.term_addr, timeout.into())?;
        call.read_bytes(target.first_addr(), len)
    }

    /// Write raw bytes starting at a register.
    ///
    /// # Errors
    ///
    /// Same as [`Device::read`].
    pub fn write(
        &self,
        term: impl Into<TermId>,
        reg: impl Into<RegId>,
        data: &[u8],
        timeout: impl Into<Timeout>,
    ) -> Result<()> {
        let (term, reg) = (term.into(), reg.into());
        let _lock = self.lock();
        let target = self.resolve(&term, &reg, None)?;
        debug!(%term, %reg, len = data.len(), "write");
        let call = Call::new(self, target.term_addr, timeout.into())?;
        call.write_bytes(target.first_addr(), data)
    }

    /// Read a register once and return each sub-register's value as the
    /// attributes of a node named after the register.
    ///
    /// Array registers report their first element.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for raw or sub-register identifiers, plus
    /// the errors of [`Device::get`].
    pub fn get_subregs(&self, term: impl Into<TermId>, reg: impl Into<RegId>, timeout: impl Into<Timeout>) -> Result<Value> {
        let (term, reg) = (term.into(), reg.into());
        let _lock = self.lock();
        let mut target = self.resolve(&term, &reg, None)?;
        match target.kind {
            AddressKind::Single => {}
            AddressKind::Array => {
                let per = target.layout.as_ref().map_or(1, |l| l.words_per_elem as usize);
                target.addrs.truncate(per);
            }
            AddressKind::Raw | AddressKind::Subregister => {
                return Err(Error::new(DataTypeError::InvalidOperation(format!(
                    "'{reg}' does not name a register"
                ))));
            }
        }
        debug!(%term, %reg, "get_subregs");
        let call = Call::new(self, target.term_addr, timeout.into())?;
        executor::get_subregs(&call, &target)
    }

    // --------------------------------------------------------------- modes

    /// Enable global policy bits.
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn enable_mode(&self, modes: Modes) -> Result<()> {
        self.with_state(|s| {
            s.policy.modes |= modes;
            Ok(())
        })
    }

    /// Disable global policy bits.
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn disable_mode(&self, modes: Modes) -> Result<()> {
        self.with_state(|s| {
            s.policy.modes &= !modes;
            Ok(())
        })
    }

    /// Replace the global policy bits.
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn set_modes(&self, modes: Modes) -> Result<()> {
        self.with_state(|s| {
            s.policy.modes = modes;
            Ok(())
        })
    }

    /// Global policy bits.
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn modes(&self) -> Result<Modes> {
        self.with_state(|s| Ok(s.policy.modes))
    }

    fn update_terminal_modes(&self, term: TermId, f: impl FnOnce(&mut Modes)) -> Result<()> {
        self.with_state(|s| {
            let addr = resolver::terminal_addr(&s.interface, &term)?;
            f(s.policy.terminal_modes.entry(addr).or_default());
            Ok(())
        })
    }

    /// Enable policy bits for one terminal.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for an unknown terminal name.
    pub fn enable_terminal_mode(&self, term: impl Into<TermId>, modes: Modes) -> Result<()> {
        self.update_terminal_modes(term.into(), |m| *m |= modes)
    }

    /// Disable policy bits for one terminal.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for an unknown terminal name.
    pub fn disable_terminal_mode(&self, term: impl Into<TermId>, modes: Modes) -> Result<()> {
        self.update_terminal_modes(term.into(), |m| *m &= !modes)
    }

    /// Replace the policy bits for one terminal.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for an unknown terminal name.
    pub fn set_terminal_modes(&self, term: impl Into<TermId>, modes: Modes) -> Result<()> {
        self.update_terminal_modes(term.into(), |m| *m = modes)
    }

    /// Override bits of one terminal (not including the global bits).
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for an unknown terminal name.
    pub fn terminal_modes(&self, term: impl Into<TermId>) -> Result<Modes> {
        let term = term.into();
        self.with_state(|s| {
            let addr = resolver::terminal_addr(&s.interface, &term)?;
            Ok(s.policy.terminal_modes.get(&addr).copied().unwrap_or_default())
        })
    }

    // ------------------------------------------------------------- policy

    /// Set the timeout used when a call passes [`Timeout::Default`].
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn set_timeout(&self, ms: u32) -> Result<()> {
        self.with_state(|s| {
            s.policy.timeout_ms = ms;
            Ok(())
        })
    }

    /// Default timeout in milliseconds.
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn timeout(&self) -> Result<u32> {
        self.with_state(|s| Ok(s.policy.timeout_ms))
    }

    /// Install a retry policy.
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn set_retry_policy(&self, policy: impl RetryPolicy + 'static) -> Result<()> {
        self.with_state(|s| {
            s.policy.retry = Arc::new(policy);
            Ok(())
        })
    }

    // ---------------------------------------------------------- lifecycle

    /// Snapshot of the interface tree.
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn interface(&self) -> Result<Tree> {
        self.with_state(|s| Ok(s.interface.clone()))
    }

    /// Replace the interface tree, returning the previous one.
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn set_interface(&self, interface: Tree) -> Result<Tree> {
        self.with_state(|s| {
            let name = interface.name(interface.root())?.to_string();
            info!(interface = %name, "interface replaced");
            Ok(std::mem::replace(&mut s.interface, interface))
        })
    }

    /// Close the transport. Later transfers fail with a transport error.
    ///
    /// # Errors
    ///
    /// Returns whatever the transport's `close` returns.
    pub fn close(&self) -> Result<()> {
        self.with_state(|s| {
            if s.closed {
                return Ok(());
            }
            s.closed = true;
            info!("device closed");
            s.transport.close()
        })
    }

    /// Whether [`Device::close`] has been called.
    ///
    /// # Errors
    ///
    /// Only fails if the device state is already borrowed on this thread.
    pub fn is_closed(&self) -> Result<bool> {
        self.with_state(|s| Ok(s.closed))
    }
}

/// Terminal address for a config key: a terminal name or a numeric address
/// that some terminal carries.
fn config_terminal_addr(tree: &Tree, key: &str) -> Result<u32> {
    let term = match parse_int_literal(key).and_then(|v| u32::try_from(v).ok()) {
        Some(addr) if !tree.has_child(tree.root(), key) => TermId::Addr(addr),
        _ => TermId::Name(key.to_string()),
    };
    let node = resolver::find_terminal(tree, &term)?;
    tree.attr_u32(node, attr::ADDR)?
        .ok_or_else(|| Error::attr_not_found(attr::ADDR))
}
