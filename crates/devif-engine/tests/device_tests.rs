//! Behavioral tests for `Device` against in-memory transports.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use devif_engine::prelude::*;
use devif_engine::transport::mock::{MemoryTransport, TransferOp};
use devif_model::TransportError;
use proptest::prelude::*;

fn board() -> Result<Tree> {
    Tree::device_interface("board").with_child(
        Tree::terminal("ctrl", 8, 16)
            .with_child(Tree::register("status").with_attr(attr::MODE, "read"))?
            .with_child(Tree::register("wide").with_attr(attr::WIDTH, 40u32))?
            .with_child(Tree::register("tbl").with_attr(attr::ARRAY, 3u32))?
            .with_child(
                Tree::register("cfg")
                    .with_child(Tree::subregister("en", 1))?
                    .with_child(
                        Tree::subregister("speed", 2)
                            .with_attr(attr::VALUEMAP, Tree::valuemap("speeds", [("slow", 1), ("fast", 3)])),
                    )?
                    .with_child(Tree::subregister("gain", 12))?
                    .with_child(Tree::subregister("span", 4))?,
            )?,
    )
}

fn field(node: &Value, name: &str) -> Result<Value> {
    let tree = node.as_node()?;
    tree.get_attr(tree.root(), name).cloned()
}

/// Every read returns the next counter value.
struct Drifting {
    reads: Arc<AtomicU32>,
}

impl Transport for Drifting {
    fn raw_read(&mut self, _: u32, _: u32, buf: &mut [u8], _: u32) -> Result<()> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        for (dst, src) in buf.iter_mut().zip(n.to_le_bytes()) {
            *dst = src;
        }
        Ok(())
    }

    fn raw_write(&mut self, _: u32, _: u32, _: &[u8], _: u32) -> Result<()> {
        Ok(())
    }
}

/// Times out the first `failures` transfers, then behaves like memory.
struct TimesOut {
    failures: u32,
    inner: MemoryTransport,
}

impl TimesOut {
    fn fail(&mut self) -> Result<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(TransportError::Timeout { timeout_ms: 5 }.into());
        }
        Ok(())
    }
}

impl Transport for TimesOut {
    fn raw_read(&mut self, term: u32, reg: u32, buf: &mut [u8], timeout_ms: u32) -> Result<()> {
        self.fail()?;
        self.inner.raw_read(term, reg, buf, timeout_ms)
    }

    fn raw_write(&mut self, term: u32, reg: u32, data: &[u8], timeout_ms: u32) -> Result<()> {
        self.fail()?;
        self.inner.raw_write(term, reg, data, timeout_ms)
    }
}

mod transfers {
    use super::*;

    #[test]
    fn test_multi_word_register_is_split_low_word_first() -> Result<()> {
        let memory = MemoryTransport::new();
        let device = Device::new(memory.clone(), board()?);
        device.set("ctrl", "wide", Value::from(0x12_3456_789A_u64), Timeout::Default)?;
        assert_eq!(memory.peek_word(0x200, 1), 0x789A);
        assert_eq!(memory.peek_word(0x200, 2), 0x3456);
        assert_eq!(memory.peek_word(0x200, 3), 0x0012);
        assert_eq!(device.get("ctrl", "wide", -1)?, Value::from(0x12_3456_789A_u64));
        Ok(())
    }

    #[test]
    fn test_array_roundtrip_and_element_access() -> Result<()> {
        let device = Device::new(MemoryTransport::new(), board()?);
        let items: Vec<Value> = vec![7.into(), 8.into(), 9.into()];
        device.set("ctrl", "tbl", items.clone(), Timeout::Default)?;
        assert_eq!(device.get("ctrl", "tbl", Timeout::Default)?, Value::List(items));
        device.set("ctrl", "tbl[1]", 80, Timeout::Default)?;
        assert_eq!(device.get("ctrl", "tbl[1]", Timeout::Default)?, Value::Int(80));
        Ok(())
    }

    #[test]
    fn test_array_rejects_wrong_shape() -> Result<()> {
        let device = Device::new(MemoryTransport::new(), board()?);
        let short: Vec<Value> = vec![1.into()];
        let err = device.set("ctrl", "tbl", short, Timeout::Default).err();
        assert_eq!(err.map(|e| e.code()), Some(-2));
        let err = device.set("ctrl", "tbl", 5, Timeout::Default).err();
        assert_eq!(err.map(|e| e.code()), Some(-2));
        Ok(())
    }

    #[test]
    fn test_subregister_write_preserves_neighbors() -> Result<()> {
        let memory = MemoryTransport::new();
        let device = Device::new(memory.clone(), board()?);
        let cfg = 7;
        memory.poke_word(0x200, cfg, 0xFFFF, 2);
        device.set("ctrl", "cfg.speed", "slow", Timeout::Default)?;
        assert_eq!(memory.peek_word(0x200, cfg), 0xFFFB);
        assert_eq!(device.get("ctrl", "cfg.speed", Timeout::Default)?, Value::Int(1));
        Ok(())
    }

    #[test]
    fn test_subregister_crossing_words() -> Result<()> {
        let memory = MemoryTransport::new();
        let device = Device::new(memory.clone(), board()?);
        device.set("ctrl", "cfg.span", 0b1011, Timeout::Default)?;
        assert_eq!(memory.peek_word(0x200, 7), 0x8000);
        assert_eq!(memory.peek_word(0x200, 8), 0b101);
        assert_eq!(device.get("ctrl", "cfg.span", Timeout::Default)?, Value::Int(0b1011));
        Ok(())
    }

    #[test]
    fn test_unknown_symbol_is_rejected_before_any_transfer() -> Result<()> {
        let memory = MemoryTransport::new();
        let device = Device::new(memory.clone(), board()?);
        let err = device.set("ctrl", "cfg.speed", "warp", Timeout::Default).err();
        assert_eq!(err.map(|e| e.code()), Some(-14));
        assert!(memory.transfers().is_empty());
        Ok(())
    }

    #[test]
    fn test_node_value_updates_several_fields_in_one_pass() -> Result<()> {
        let memory = MemoryTransport::new();
        let device = Device::new(memory.clone(), board()?);
        let update = Tree::generic("cfg")
            .with_attr("en", 1)
            .with_attr("speed", "fast")
            .with_attr("gain", 0x10);
        device.set("ctrl", "cfg", update, Timeout::Default)?;
        let writes: Vec<u32> = memory
            .transfers()
            .iter()
            .filter(|t| t.op == TransferOp::Write)
            .map(|t| t.reg_addr)
            .collect();
        assert_eq!(writes, vec![7]);
        assert_eq!(memory.peek_word(0x200, 7), 0b1000_0111);

        let subregs = device.get_subregs("ctrl", "cfg", Timeout::Default)?;
        assert_eq!(field(&subregs, "en")?, Value::Int(1));
        assert_eq!(field(&subregs, "speed")?, Value::Int(3));
        assert_eq!(field(&subregs, "gain")?, Value::Int(0x10));
        assert_eq!(field(&subregs, "span")?, Value::Int(0));
        Ok(())
    }

    #[test]
    fn test_get_subregs_rejects_subregister_ids() -> Result<()> {
        let device = Device::new(MemoryTransport::new(), board()?);
        let err = device.get_subregs("ctrl", "cfg.en", Timeout::Default).err();
        assert_eq!(err.map(|e| e.code()), Some(-4));
        Ok(())
    }

    #[test]
    fn test_raw_register_bypasses_tree() -> Result<()> {
        let memory = MemoryTransport::new();
        let device = Device::new(memory.clone(), board()?);
        device.set(0x300u32, 0x42u32, 0xBEEF_u32, Timeout::Default)?;
        assert_eq!(memory.peek(0x300, 0x42), Some(vec![0xEF, 0xBE]));
        device.set_with_width("ctrl", 0x10u32, 4, 0x0102_0304_u32, Timeout::Default)?;
        assert_eq!(memory.peek(0x200, 0x10), Some(vec![4, 3, 2, 1]));
        assert_eq!(device.get_with_width("ctrl", 0x10u32, 1, Timeout::Default)?, Value::Int(4));
        Ok(())
    }

    #[test]
    fn test_byte_span_read_and_write() -> Result<()> {
        let memory = MemoryTransport::new();
        let device = Device::new(memory.clone(), board()?);
        device.write("ctrl", "tbl", &[1, 2, 3, 4, 5], Timeout::Default)?;
        assert_eq!(memory.peek(0x200, 4), Some(vec![1, 2, 3, 4, 5]));
        assert_eq!(device.read("ctrl", "tbl", 3, Timeout::Default)?, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_timeout_is_resolved_against_device_default() -> Result<()> {
        struct Recorder(Arc<AtomicU32>);
        impl Transport for Recorder {
            fn raw_read(&mut self, _: u32, _: u32, _: &mut [u8], timeout_ms: u32) -> Result<()> {
                self.0.store(timeout_ms, Ordering::SeqCst);
                Ok(())
            }
            fn raw_write(&mut self, _: u32, _: u32, _: &[u8], _: u32) -> Result<()> {
                Ok(())
            }
        }
        let seen = Arc::new(AtomicU32::new(u32::MAX));
        let device = Device::new(Recorder(Arc::clone(&seen)), board()?);
        device.set_timeout(75)?;
        device.get("ctrl", "status", -1)?;
        assert_eq!(seen.load(Ordering::SeqCst), 75);
        device.get("ctrl", "status", 0)?;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        device.get("ctrl", "status", Timeout::Millis(9))?;
        assert_eq!(seen.load(Ordering::SeqCst), 9);
        Ok(())
    }
}

mod verification {
    use super::*;

    #[test]
    fn test_double_get_mismatch_reports_both_reads() -> Result<()> {
        let reads = Arc::new(AtomicU32::new(0));
        let device = Device::new(Drifting { reads: Arc::clone(&reads) }, board()?);
        device.enable_mode(Modes::DOUBLEGET_VERIFY)?;
        let err = device.get("ctrl", "tbl[0]", Timeout::Default).err();
        let err = err.ok_or_else(|| Error::operation("expected a mismatch"))?;
        assert!(err.is_operation_error());
        let payload = err.payload().cloned().unwrap_or(Value::Int(0));
        assert_eq!(field(&payload, "get_val0")?, Value::Int(0));
        assert_eq!(field(&payload, "get_val1")?, Value::Int(1));
        assert_eq!(field(&payload, "reg")?, Value::Int(4));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn test_double_get_skips_read_only_registers() -> Result<()> {
        let reads = Arc::new(AtomicU32::new(0));
        let device = Device::new(Drifting { reads: Arc::clone(&reads) }, board()?);
        device.enable_mode(Modes::DOUBLEGET_VERIFY)?;
        device.get("ctrl", "status", Timeout::Default)?;
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_retry_gives_up_after_limit() -> Result<()> {
        let reads = Arc::new(AtomicU32::new(0));
        let device = Device::new(Drifting { reads: Arc::clone(&reads) }, board()?);
        device.set_modes(Modes::DOUBLEGET_VERIFY | Modes::RETRY_ON_FAILURE)?;
        device.set_retry_policy(AttemptLimit(3))?;
        assert!(device.get("ctrl", "wide", Timeout::Default).is_err());
        assert_eq!(reads.load(Ordering::SeqCst), 6);
        Ok(())
    }

    #[test]
    fn test_transport_timeout_is_retried() -> Result<()> {
        let memory = MemoryTransport::new();
        memory.poke_word(0x200, 0, 0x55, 2);
        let transport = TimesOut {
            failures: 1,
            inner: memory,
        };
        let device = Device::new(transport, board()?);
        device.enable_terminal_mode("ctrl", Modes::RETRY_ON_FAILURE)?;
        assert_eq!(device.get("ctrl", "status", Timeout::Default)?, Value::Int(0x55));
        Ok(())
    }

    #[test]
    fn test_timeout_without_retry_surfaces() -> Result<()> {
        let transport = TimesOut {
            failures: 1,
            inner: MemoryTransport::new(),
        };
        let device = Device::new(transport, board()?);
        let err = device.get("ctrl", "status", Timeout::Default).err();
        assert_eq!(err.map(|e| e.code()), Some(-34));
        Ok(())
    }

    #[test]
    fn test_policy_sees_attempts_and_address() -> Result<()> {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let device = Device::new(Drifting { reads: Arc::new(AtomicU32::new(0)) }, board()?);
        device.set_modes(Modes::DOUBLEGET_VERIFY | Modes::RETRY_ON_FAILURE)?;
        device.set_retry_policy(move |_: &Device, term: u32, reg: u32, attempt: u32, _: &Error| -> Result<bool> {
            log.lock().push((term, reg, attempt));
            Ok(attempt < 2)
        })?;
        assert!(device.get("ctrl", "tbl[2]", Timeout::Default).is_err());
        assert_eq!(*seen.lock(), vec![(0x200, 6, 1), (0x200, 6, 2)]);
        Ok(())
    }

    #[test]
    fn test_failing_policy_is_wrapped() -> Result<()> {
        let device = Device::new(Drifting { reads: Arc::new(AtomicU32::new(0)) }, board()?);
        device.set_modes(Modes::DOUBLEGET_VERIFY | Modes::RETRY_ON_FAILURE)?;
        device.set_retry_policy(|_: &Device, _: u32, _: u32, _: u32, _: &Error| -> Result<bool> {
            Err(Error::user(7, "no"))
        })?;
        let err = device.get("ctrl", "tbl", Timeout::Default).err();
        let err = err.ok_or_else(|| Error::operation("expected failure"))?;
        assert!(err.is_operation_error());
        let payload = err.payload().cloned().unwrap_or(Value::Int(0));
        assert_eq!(field(&payload, "code")?, Value::Int(7));
        assert_eq!(field(&payload, "attempt")?, Value::Int(1));
        Ok(())
    }

    #[test]
    fn test_policy_may_use_device_but_not_nest_retries() -> Result<()> {
        let outcome = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&outcome);
        let device = Device::new(Drifting { reads: Arc::new(AtomicU32::new(0)) }, board()?);
        device.set_modes(Modes::DOUBLEGET_VERIFY | Modes::RETRY_ON_FAILURE)?;
        device.set_retry_policy(move |dev: &Device, _: u32, _: u32, _: u32, _: &Error| -> Result<bool> {
            let inner = dev.get("ctrl", "tbl[1]", Timeout::Default);
            *slot.lock() = Some(inner.map_err(|e| e.code()));
            Ok(false)
        })?;
        assert!(device.get("ctrl", "tbl[0]", Timeout::Default).is_err());
        assert_eq!(*outcome.lock(), Some(Err(-21)));
        Ok(())
    }

    #[test]
    fn test_getset_mismatch_on_stuck_register() -> Result<()> {
        struct Stuck;
        impl Transport for Stuck {
            fn raw_read(&mut self, _: u32, _: u32, buf: &mut [u8], _: u32) -> Result<()> {
                buf.fill(0);
                Ok(())
            }
            fn raw_write(&mut self, _: u32, _: u32, _: &[u8], _: u32) -> Result<()> {
                Ok(())
            }
        }
        let device = Device::new(Stuck, board()?);
        device.enable_mode(Modes::GETSET_VERIFY)?;
        let err = device.set("ctrl", "tbl[0]", 9, Timeout::Default).err();
        let err = err.ok_or_else(|| Error::operation("expected mismatch"))?;
        let payload = err.payload().cloned().unwrap_or(Value::Int(0));
        assert_eq!(field(&payload, "set_val")?, Value::Int(9));
        assert_eq!(field(&payload, "get_val")?, Value::Int(0));
        Ok(())
    }

    #[test]
    fn test_status_and_checksum_verification() -> Result<()> {
        let memory = MemoryTransport::new();
        let device = Device::new(memory.clone(), board()?);
        device.set_modes(Modes::STATUS_VERIFY | Modes::CHECKSUM_VERIFY)?;
        device.set("ctrl", "tbl[0]", 3, Timeout::Default)?;
        memory.set_status(4);
        let err = device.get("ctrl", "tbl[0]", Timeout::Default).err();
        let err = err.ok_or_else(|| Error::operation("expected status failure"))?;
        let payload = err.payload().cloned().unwrap_or(Value::Int(0));
        assert_eq!(field(&payload, "status")?, Value::Int(4));
        Ok(())
    }
}

mod locking {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_excludes_other_threads() -> Result<()> {
        let memory = MemoryTransport::new();
        let device = Arc::new(Device::new(memory.clone(), board()?));
        let guard = device.lock();
        let worker = {
            let device = Arc::clone(&device);
            thread::spawn(move || device.set("ctrl", "tbl[0]", 1, Timeout::Default))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(memory.write_count(), 0);
        device.set("ctrl", "tbl[0]", 2, Timeout::Default)?;
        drop(guard);
        let joined = worker.join().map_err(|e| Error::operation(format!("worker panicked: {e:?}")))?;
        joined?;
        assert_eq!(memory.write_count(), 2);
        assert_eq!(memory.peek_word(0x200, 4), 1);
        Ok(())
    }
}

proptest! {
    #[test]
    fn prop_wide_register_roundtrip(raw in 0u64..(1u64 << 40)) {
        let device = Device::new(MemoryTransport::new(), board()?);
        device.set("ctrl", "wide", Value::from(raw), Timeout::Default)?;
        prop_assert_eq!(device.get("ctrl", "wide", Timeout::Default)?, Value::from(raw));
    }

    #[test]
    fn prop_subregister_write_touches_only_its_bits(background in 0u32..0x1_0000, gain in 0u32..0x1000) {
        let memory = MemoryTransport::new();
        let device = Device::new(memory.clone(), board()?);
        memory.poke_word(0x200, 7, background, 2);
        device.set("ctrl", "cfg.gain", gain, Timeout::Default)?;
        let word = memory.peek_word(0x200, 7);
        prop_assert_eq!((word >> 3) & 0xFFF, gain);
        prop_assert_eq!(word & 0x8007, background & 0x8007);
    }
}
