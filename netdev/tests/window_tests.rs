//! iATU window tests on windowed devices

mod common;

use std::sync::atomic::Ordering;

use common::{host_frame, tagged_frame, Sim, WIN0_START, WIN_SIZE};
use sdma_netdev::dma::RxCmd;
use sdma_netdev::hw::regs::{atu_inbound, ATU_CTRL2, ATU_CTRL2_ENABLE, ATU_LIMIT, ATU_START, ATU_TARGET, REG_BASE, VENDOR_ID};
use sdma_netdev::{ConfigError, Parameter, SdmaError, TxFrame};

#[test]
fn test_first_access_enables_window() {
    let sim = Sim::windowed();
    let dev = sim.device();

    assert_eq!(dev.registers().read(VENDOR_ID), 0x11AB);

    let win = atu_inbound(5);
    assert_eq!(sim.bar0.get(win + ATU_START), WIN0_START + 5 * WIN_SIZE);
    assert_eq!(sim.bar0.get(win + ATU_LIMIT), WIN0_START + 6 * WIN_SIZE - 1);
    assert_eq!(sim.bar0.get(win + ATU_CTRL2), ATU_CTRL2_ENABLE);
    assert_eq!(sim.bar0.get(win + ATU_TARGET), REG_BASE);
    assert_eq!(dev.registers().cached_base(), Some(REG_BASE));
}

#[test]
fn test_same_block_does_not_retarget() {
    let sim = Sim::windowed();
    let dev = sim.device();
    let regs = dev.registers();

    regs.read(VENDOR_ID);
    regs.write(REG_BASE + 0x100, 7);
    regs.read(REG_BASE + 0xF_FFFC);
    assert_eq!(regs.reprogram_count(), 1);

    // another 1MB block moves the window
    regs.write(0x1D10_0000, 1);
    assert_eq!(regs.reprogram_count(), 2);
    assert_eq!(sim.bar0.get(atu_inbound(5) + ATU_TARGET), 0x1D10_0000);
    assert_eq!(sim.switch.reg(0x1D10_0000), 1);

    regs.read(VENDOR_ID);
    assert_eq!(regs.reprogram_count(), 3);
    assert_eq!(sim.switch.reg(REG_BASE + 0x100), 7);
}

#[test]
fn test_windowed_data_path() {
    let sim = Sim::windowed();
    let dev = sim.open(0x1);

    let payload = [0x08, 0x00, 0xAB, 0xCD];
    assert!(sim.switch.inject_rx(0, &tagged_frame(&payload), RxCmd::empty()));
    assert_eq!(dev.poll(64), 1);
    assert_eq!(sim.host.take()[0].data, host_frame(&payload));

    let frame = [0x33u8; 80];
    assert_eq!(dev.start_xmit(&TxFrame::linear(&frame)), Ok(68));
    assert_eq!(sim.switch.tx_log().len(), 1);
}

#[test]
fn test_atu_win_selection() {
    let sim = Sim::windowed();
    let dev = sim.device();

    // no window: queue parameters need one
    dev.set_parameter("atu_win", "-1").expect("set should succeed");
    assert_eq!(
        dev.set_parameter("rx_queues", "0x1"),
        Err(SdmaError::Config(ConfigError::AtuWindowRequired(Parameter::RxQueues)))
    );
    assert_eq!(
        dev.set_parameter("tx_queue", "0"),
        Err(SdmaError::Config(ConfigError::AtuWindowRequired(Parameter::TxQueue)))
    );

    dev.set_parameter("atu_win", "3").expect("set should succeed");
    assert_eq!(dev.registers().atu_window(), Some(3));
    dev.set_parameter("rx_queues", "0x1").expect("set should succeed");
    assert_eq!(sim.bar0.get(atu_inbound(3) + ATU_START), 0);

    assert_eq!(dev.registers().read(VENDOR_ID), 0x11AB);
    assert_eq!(sim.bar0.get(atu_inbound(3) + ATU_START), WIN0_START + 3 * WIN_SIZE);

    assert!(dev.set_parameter("atu_win", "8").is_err());
    assert_eq!(dev.registers().atu_window(), Some(3));

    let dump = dev.parameter("atu_win").unwrap();
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines.len(), 8);
    assert!(lines[3].starts_with("[*3]"));
    assert!(lines[5].starts_with("[ 5]"));
}

#[test]
fn test_open_requires_atu_window() {
    let sim = Sim::windowed();
    let dev = sim.configured(0x1);
    dev.set_parameter("atu_win", "-1").expect("set should succeed");

    assert_eq!(dev.open(), Err(SdmaError::AtuWindowUnset));
    assert!(!dev.is_up());
    assert_eq!(sim.dma.coherent_live.load(Ordering::SeqCst), 0);
    assert!(!sim.irq.is_registered());

    dev.set_parameter("atu_win", "5").expect("set should succeed");
    dev.open().expect("open should succeed");
}

#[test]
fn test_atu_win_busy_while_up() {
    let sim = Sim::windowed();
    let dev = sim.open(0x1);
    assert_eq!(dev.set_parameter("atu_win", "4"), Err(SdmaError::DeviceBusy));
    assert_eq!(dev.registers().atu_window(), Some(5));
}

#[test]
fn test_atu_win_unsupported_on_flat() {
    let sim = Sim::flat();
    let dev = sim.device();
    assert_eq!(
        dev.set_parameter("atu_win", "5"),
        Err(SdmaError::Config(ConfigError::Unsupported(Parameter::AtuWin)))
    );
    assert_eq!(dev.parameter("atu_win").unwrap(), "");
    assert_eq!(dev.registers().reprogram_count(), 0);
}
