//! Snapshot save/resume coverage over in-memory and file media, including a
//! file-backed RAM store that survives the VM.

use log as _;
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use vm_core::{
    AccessWidth, CpuState, FileSnapshot, GuestBus, InMemoryStore, MemorySnapshot, SeekStore,
    SnapshotMedium, SnapshotRecord, StepEngine, TickOutcome, Vm, VmConfig, VmError, VmState,
    SNAPSHOT_RECORD_BYTES,
};

const RAM: u32 = 64 * 1024;

fn config() -> VmConfig {
    VmConfig {
        ram_size: RAM,
        ..VmConfig::default()
    }
}

fn fresh() -> Vm<InMemoryStore, Vec<u8>> {
    Vm::new(config(), InMemoryStore::new(RAM), Vec::new()).expect("valid config")
}

/// Bumps a counter word in guest RAM and advances the PC each tick.
struct Counter;

impl StepEngine for Counter {
    fn step(
        &mut self,
        cpu: &mut CpuState,
        bus: &mut dyn GuestBus,
        image_base: u32,
        _elapsed_us: u32,
        max_instructions: u32,
    ) -> Result<u32, VmError> {
        let addr = image_base + 0x100;
        let value = bus.load(AccessWidth::Word, addr)?;
        bus.store(AccessWidth::Word, addr, value + 1)?;
        cpu.pc += 4 * max_instructions;
        cpu.set_reg(7, value + 1);
        Ok(1)
    }
}

#[test]
fn save_then_load_restores_cpu_and_time_mark() {
    let mut vm = fresh();
    vm.power_on().expect("boot");
    vm.run().expect("run");
    for _ in 0..3 {
        assert!(matches!(vm.tick(&mut Counter), TickOutcome::BudgetExhausted));
    }
    let saved_cpu = *vm.cpu();
    let saved_time = vm.last_time();

    let mut medium = MemorySnapshot::new();
    vm.save_snapshot(&mut medium).expect("save");
    assert_eq!(medium.bytes().map(<[u8]>::len), Some(SNAPSHOT_RECORD_BYTES));

    let _ = vm.tick(&mut Counter);
    assert_ne!(*vm.cpu(), saved_cpu);

    vm.load_snapshot(&mut medium).expect("load");
    assert_eq!(*vm.cpu(), saved_cpu);
    assert_eq!(vm.last_time(), saved_time);
    assert_eq!(vm.state(), VmState::Running);
}

#[test]
fn snapshot_into_fresh_vm_resumes_paused() {
    let mut source = fresh();
    source.power_on().expect("boot");
    source.run().expect("run");
    let _ = source.tick(&mut Counter);
    let mut medium = MemorySnapshot::new();
    source.save_snapshot(&mut medium).expect("save");

    let mut target = fresh();
    assert_eq!(*target.cpu(), CpuState::default());
    target.load_snapshot(&mut medium).expect("load");
    assert_eq!(target.state(), VmState::Paused);
    assert_eq!(target.cpu(), source.cpu());
    assert_eq!(target.last_time(), source.last_time());
    target.run().expect("paused -> running");
}

#[test]
fn boot_state_survives_a_round_trip_into_a_zeroed_cpu() {
    let mut vm = fresh();
    vm.power_on().expect("boot");
    let boot = *vm.cpu();
    let mut medium = MemorySnapshot::new();
    vm.save_snapshot(&mut medium).expect("save");

    *vm.cpu_mut() = CpuState::default();
    vm.load_snapshot(&mut medium).expect("load");
    assert_eq!(*vm.cpu(), boot);
    assert_eq!(vm.cpu().pc, 0x8000_0000);
    assert_eq!(vm.cpu().reg(11), 0x8000_0000 + RAM - 192 - 1536);
}

#[rstest]
#[case::empty(0)]
#[case::short(SNAPSHOT_RECORD_BYTES - 1)]
#[case::long(SNAPSHOT_RECORD_BYTES + 1)]
#[case::cpu_only(192)]
fn wrong_sized_records_leave_state_unchanged(#[case] len: usize) {
    let mut vm = fresh();
    vm.power_on().expect("boot");
    vm.cpu_mut().set_reg(3, 0x1234);
    let before = *vm.cpu();
    let before_time = vm.last_time();

    let mut medium = MemorySnapshot::new();
    medium.replace(vec![0xAB; len]);
    let err = vm.load_snapshot(&mut medium).expect_err("wrong size");

    assert!(matches!(err, VmError::SnapshotLength { expected: 200, actual } if actual == len));
    assert_eq!(*vm.cpu(), before);
    assert_eq!(vm.last_time(), before_time);
    assert_eq!(vm.state(), VmState::Paused);
}

#[test]
fn missing_record_is_reported() {
    let mut vm = fresh();
    let dir = tempfile::tempdir().expect("temp dir");
    let mut medium = FileSnapshot::new(dir.path().join("absent.bin"));
    assert!(matches!(
        vm.load_snapshot(&mut medium),
        Err(VmError::SnapshotMissing)
    ));
    assert_eq!(vm.state(), VmState::Stopped);
}

#[test]
fn snapshot_load_acts_as_reset_for_a_halted_vm() {
    struct PowerOff;

    impl StepEngine for PowerOff {
        fn step(
            &mut self,
            _cpu: &mut CpuState,
            _bus: &mut dyn GuestBus,
            _image_base: u32,
            _elapsed_us: u32,
            _max_instructions: u32,
        ) -> Result<u32, VmError> {
            Ok(0x5555)
        }
    }

    let mut vm = fresh();
    vm.power_on().expect("boot");
    let mut medium = MemorySnapshot::new();
    vm.save_snapshot(&mut medium).expect("save");
    vm.run().expect("run");
    assert!(matches!(vm.tick(&mut PowerOff), TickOutcome::PoweredOff));

    assert!(vm.run().is_err());

    vm.load_snapshot(&mut medium).expect("load");
    assert_eq!(vm.state(), VmState::Paused);
    assert_eq!(*vm.cpu(), vm.config().boot_cpu_state());
    vm.run().expect("paused -> running");
    assert!(matches!(vm.tick(&mut PowerOff), TickOutcome::PoweredOff));
}

#[test]
fn file_backed_ram_and_snapshot_resume_across_instances() {
    let dir = tempfile::tempdir().expect("temp dir");
    let ram_path = dir.path().join("vram.bin");
    let snap_path = dir.path().join("state.bin");

    let expected_cpu = {
        let store = SeekStore::open(&ram_path, RAM).expect("ram file");
        let mut vm = Vm::new(config(), store, Vec::new()).expect("valid config");
        vm.power_on().expect("boot");
        vm.run().expect("run");
        for _ in 0..5 {
            let _ = vm.tick(&mut Counter);
        }
        vm.save_snapshot(&mut FileSnapshot::new(&snap_path))
            .expect("save");
        vm.store_mut().commit().expect("sync ram");
        *vm.cpu()
    };

    let store = SeekStore::open(&ram_path, RAM).expect("reopen ram file");
    let mut vm = Vm::new(config(), store, Vec::new()).expect("valid config");
    let mut medium = FileSnapshot::new(&snap_path);
    assert_eq!(medium.fetch().expect("record").len(), SNAPSHOT_RECORD_BYTES);
    vm.load_snapshot(&mut medium).expect("load");
    assert_eq!(*vm.cpu(), expected_cpu);
    assert_eq!(vm.cpu().reg(7), 5);

    vm.run().expect("run");
    let _ = vm.tick(&mut Counter);
    assert_eq!(vm.cpu().reg(7), 6);
}

#[test]
fn record_decoding_is_exposed_for_hosts() {
    let mut vm = fresh();
    vm.power_on().expect("boot");
    let record = vm.snapshot();
    let decoded = SnapshotRecord::from_bytes(&record.to_bytes()).expect("valid");
    assert_eq!(decoded, record);

    let mut other = fresh();
    other.restore(decoded);
    assert_eq!(other.cpu(), vm.cpu());
    assert_eq!(other.state(), VmState::Paused);
}
