//! Integration tests driving the PC system through its public API
//!
//! These cover a host thread running the machine while another thread reads
//! the display, disk loads feeding later execution, and unsupported
//! interrupts reaching the log file.

use emu_core::logging::{LogCategory, LogConfig, LogLevel};
use emu_core::System;
use emu_pc::{
    CancelToken, DisplayEvent, MachineConfig, PcSystem, RecordingSink, RunOutcome, RunState,
    BOOT_ADDRESS,
};
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

/// Boot sector followed by `extra` sectors of data, padded to 512 bytes each
fn floppy(boot: &[u8], extra: &[&[u8]]) -> Vec<u8> {
    let mut image = vec![0u8; 512 * (1 + extra.len())];
    image[..boot.len()].copy_from_slice(boot);
    for (i, sector) in extra.iter().enumerate() {
        let start = 512 * (i + 1);
        image[start..start + sector.len()].copy_from_slice(sector);
    }
    image
}

#[test]
fn test_disk_load_then_execute_loaded_code() {
    // A CLI sled fills the boot sector and ends in INT 13h, which reads
    // sector 3 to 0x7E00, right behind the boot sector. The image copy put
    // the blank sector 2 there. Execution falls through into the loaded
    // code, which prints via INT 10h and halts.
    let mut boot = vec![0xFA; 510];
    boot.extend_from_slice(&[0xCD, 0x13]);
    let stage2 = [0xCD, 0x10, 0xF4];
    let blank: &[u8] = &[];
    let image = floppy(&boot, &[blank, &stage2]);

    let sink = RecordingSink::new();
    let mut sys = PcSystem::new();
    sys.mount("Floppy", &image).unwrap();
    sys.set_display_sink(Box::new(sink.clone()));
    assert_eq!(sys.memory().as_slice()[0x7E00], 0);

    let mut regs = sys.registers();
    regs.set_ax(0x0201); // read 1 sector
    regs.set_cx(0x0003); // cylinder 0, sector 3
    regs.set_dx(0x0000); // head 0, drive 0
    regs.set_bx(0x7E00);
    sys.set_registers(&regs);

    let report = sys.run_with(511, &CancelToken::new());
    assert_eq!(report.outcome, RunOutcome::StepLimitExceeded);
    assert_eq!(report.registers.eip, 0x7E00);
    assert_eq!(report.registers.ah(), 0);
    assert_eq!(sys.memory().as_slice()[0x7E00..0x7E03], stage2);

    // AH=0 AL=1 after the read; retarget AX for the print
    let mut regs = sys.registers();
    regs.set_ax(0x0E4F);
    sys.set_registers(&regs);

    let report = sys.run();

    assert_eq!(report.outcome, RunOutcome::Halted);
    assert_eq!(report.steps, 2);
    assert_eq!(
        sink.events(),
        vec![DisplayEvent::Write { row: 0, col: 0, ch: b'O', attr: 0x07 }]
    );
    assert_eq!(sys.steps(), 513);
}

#[test]
fn test_message_output_through_repeated_interrupts() {
    let message = b"Hi!\n";
    let mut boot = Vec::new();
    for _ in message {
        boot.extend_from_slice(&[0xCD, 0x10]);
    }
    boot.push(0xF4);

    let mut sys = PcSystem::new();
    sys.load_image(&floppy(&boot, &[])).unwrap();

    for &ch in message {
        let mut regs = sys.registers();
        regs.set_ah(0x0E);
        regs.set_al(ch);
        sys.set_registers(&regs);
        assert_eq!(sys.step(), RunState::Running);
    }
    assert_eq!(sys.step(), RunState::Halted);

    let display = sys.display();
    let display = display.lock().unwrap();
    assert_eq!(display.row_text(0), "Hi!");
    assert_eq!(display.cursor(), (1, 0));
}

#[test]
fn test_run_on_worker_thread_with_cancel() {
    // Endless CLI run: only the cancel token or the step limit stops it
    let config = MachineConfig {
        max_steps: u64::MAX,
        copy_boot_sector: false,
        ..MachineConfig::default()
    };
    let mut sys = PcSystem::with_config(config).unwrap();
    let mut image = vec![0u8; 0x10_0000];
    image[BOOT_ADDRESS as usize..].fill(0xFA);
    sys.load_image(&image).unwrap();

    let display = sys.display();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    let worker = thread::spawn(move || {
        let report = sys.run_with(u64::MAX, &worker_cancel);
        (report, sys)
    });

    // The host side only touches the display through its mutex
    assert_eq!(display.lock().unwrap().cursor(), (0, 0));
    cancel.cancel();

    let (report, sys) = worker.join().unwrap();
    // Cancelled, or ran off the end of memory first on a very fast machine
    match report.outcome {
        RunOutcome::Cancelled => assert_eq!(sys.state(), &RunState::Running),
        RunOutcome::Faulted(_) => assert_eq!(report.registers.eip, 0x10_0000),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_unsupported_interrupt_logged_to_file() {
    let path = std::env::temp_dir().join(format!("tinybox-stubs-{}.log", std::process::id()));
    let _ = fs::remove_file(&path);

    let config = LogConfig::global();
    config.set_level(LogCategory::Stubs, LogLevel::Warn);
    config.set_log_file(path.clone()).unwrap();

    let mut sys = PcSystem::new();
    sys.load_image(&[0xCD, 0x15, 0xF4]).unwrap();
    let report = sys.run();

    config.clear_log_file();
    config.reset();
    assert_eq!(report.outcome, RunOutcome::Halted);

    // The writer thread drains its queue after the sender is dropped
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut contents = String::new();
    while Instant::now() < deadline {
        contents = fs::read_to_string(&path).unwrap_or_default();
        if contents.contains("Unsupported interrupt 15h AH=00h") {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let _ = fs::remove_file(&path);
    assert!(
        contents.contains("Unsupported interrupt 15h AH=00h"),
        "log file contents: {:?}",
        contents
    );
}

#[test]
fn test_save_state_is_valid_json_text() {
    let mut sys = PcSystem::new();
    sys.load_image(&[0xFA, 0xF4]).unwrap();
    sys.run();

    let text = serde_json::to_string_pretty(&sys.save_state()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["state"], "halted");
    assert_eq!(parsed["steps"], 2);
}
