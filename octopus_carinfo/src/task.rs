//! The CarInfo task: bridges the protocol layer (PTL) and the
//! side-information-flow (SIF) feed to the vehicle data model.
//!
//! Send/recv handlers are grounded in `meter_module_send_handler` /
//! `meter_module_receive_handler`, `indicator_module_...`, and
//! `drivinfo_module_...` in `octopus_carinfor.c`. The SIF bit-decode mirrors
//! `app_car_controller_sif_updating`'s 12-byte frame layout. The SIF-derived
//! indicator assignments (`ready`, `ecu_fault`, `sensor_fault`, `motor_fault`,
//! `parking`) mirror `app_car_controller_msg_handler`; the GPIO-sourced
//! indicator bits in that same function (`position`, `high_beam`, left/right
//! turn) are left untouched here — no component in this workspace owns
//! physical GPIO, so those four fields keep whatever an external caller
//! last wrote into the model via IPC.
//!
//! The disabled round-robin poller in `app_car_controller_msg_handler`
//! (`#if 0` block cycling SOC / RPM+speed / gear / error-info every 300 ms)
//! is revived here as the task's periodic keepalive cycle, since it
//! expresses an intended periodic-push behavior worth keeping.

use crate::model::{Indicator, ModelStore, SifSnapshot, SifStatus};
use crate::soc::estimate_soc;
use octopus_common::consts::{car_msg, group, task_msg, METER_RPM_OFFSET};
use octopus_common::prelude::{elapsed, restart, OctopusResult, TaskId, TickCounter};
use octopus_ptl::{Direction, FrameType, MessageQueue, Module, ModuleRegistry};
use octopus_taskmgr::task::Task;
use std::sync::Arc;

/// Protocol command ids for the three modules this task owns, grounded on
/// `CMD_MODMETER_*` / `CMD_MODINDICATOR_*` / `CMD_MODDRIVINFO_*` in
/// `octopus_carinfor.c`.
mod cmd {
    pub const METER_RPM_SPEED: u8 = 0x01;
    pub const METER_SOC: u8 = 0x02;
    pub const INDICATOR_STATE: u8 = 0x01;
    pub const INDICATOR_ERROR_INFO: u8 = 0x02;
    pub const DRIVINFO_GEAR: u8 = 0x01;
}

/// Raw SIF sample as read from whatever backs the vehicle's side
/// information flow interface (`SIF_ReadData` in the vendor firmware).
/// `None` means no new sample is available this tick.
pub type SifSource = Box<dyn FnMut() -> Option<[u8; 12]> + Send>;

const SIF_MARKER: (u8, u8) = (0x08, 0x61);
const SIF_POLL_INTERVAL_MS: u32 = 100;
const KEEPALIVE_INTERVAL_MS: u32 = 300;
const WHEEL_RADIUS_M: f64 = 0.127;
const HALL_COUNTER_TO_RPM: f64 = 1.2;

fn meter_key() -> FrameType {
    FrameType::new(Direction::M2a, Module::Meter)
}

fn indicator_key() -> FrameType {
    FrameType::new(Direction::M2a, Module::Indicator)
}

fn drivinfo_key() -> FrameType {
    FrameType::new(Direction::M2a, Module::DrivInfo)
}

fn decode_sif(buf: &[u8; 12]) -> SifSnapshot {
    let mut status = SifStatus::empty();
    status.set(SifStatus::SIDE_STAND, buf[2] & 0x08 != 0);
    status.set(SifStatus::BOOT_GUARD, buf[2] & 0x02 != 0);
    status.set(SifStatus::HALL_FAULT, buf[3] & 0x40 != 0);
    status.set(SifStatus::THROTTLE_FAULT, buf[3] & 0x20 != 0);
    status.set(SifStatus::CONTROLLER_FAULT, buf[3] & 0x10 != 0);
    status.set(SifStatus::LOW_VOLTAGE_PROTECTION, buf[3] & 0x08 != 0);
    status.set(SifStatus::CRUISE, buf[3] & 0x04 != 0);
    status.set(SifStatus::ASSIST, buf[3] & 0x02 != 0);
    status.set(SifStatus::MOTOR_FAULT, buf[3] & 0x01 != 0);
    status.set(SifStatus::MOTOR_RUNNING, buf[4] & 0x40 != 0);
    status.set(SifStatus::BRAKE, buf[4] & 0x20 != 0);
    status.set(SifStatus::CONTROLLER_PROTECTION, buf[4] & 0x10 != 0);
    status.set(SifStatus::COAST_CHARGING, buf[4] & 0x08 != 0);
    status.set(SifStatus::ANTI_SPEED_PROTECTION, buf[4] & 0x04 != 0);
    status.set(SifStatus::SEVENTY_PERCENT_CURRENT, buf[5] & 0x80 != 0);
    status.set(SifStatus::PUSH_TO_TALK, buf[5] & 0x40 != 0);
    status.set(SifStatus::EKK_BACKUP_POWER, buf[5] & 0x20 != 0);
    status.set(SifStatus::OVER_CURRENT_PROTECTION, buf[5] & 0x10 != 0);
    status.set(SifStatus::MOTOR_SHAFT_LOCK_PROTECTION, buf[5] & 0x08 != 0);
    status.set(SifStatus::REVERSE, buf[5] & 0x04 != 0);
    status.set(SifStatus::ELECTRONIC_BRAKE, buf[5] & 0x02 != 0);
    status.set(SifStatus::SPEED_LIMIT, buf[5] & 0x01 != 0);

    SifSnapshot {
        status,
        gear: ((buf[4] & 0x80) >> 5) | (buf[4] & 0x03),
        current: buf[6],
        hall_counter: u16::from_be_bytes([buf[7], buf[8]]),
        soc: buf[9],
        voltage_system: buf[10],
    }
}

/// Derive stored RPM (with the `+20000` offset) and displayed-speed-input
/// `speed_real` from a hall-sensor edge count, per the wheel-geometry
/// formula in `app_car_controller_sif_updating`.
fn hall_counter_to_rpm_and_speed(hall_counter: u16) -> (u16, u16) {
    let rpm = hall_counter as f64 * HALL_COUNTER_TO_RPM;
    let angular_velocity = rpm * (2.0 * std::f64::consts::PI / 60.0);
    let velocity_m_per_s = angular_velocity * WHEEL_RADIUS_M;
    let speed_real = velocity_m_per_s * 36.0; // m/s -> 0.1 km/h
    let rpm_stored = (rpm + METER_RPM_OFFSET as f64) as u16;
    (rpm_stored, speed_real as u16)
}

/// Post `task_msg::MODEL_CHANGED` to the IPC task for `group::CAR`/`msg_id`
/// (spec.md §4.7 "on any model mutation, notifies the IPC subsystem"; §2
/// data-flow "C7 updates C5 ... and -> C9 fan-out"). Shared by the recv
/// handlers below and by [`CarInfoTask::notify_model_changed`], since an
/// inbound MCU frame is, in the wired binary, the only runtime path that
/// ever mutates the model (`octopus/src/main.rs`'s SIF source is a stub).
fn notify_model_changed(queue: &Arc<MessageQueue>, msg_id: u8) {
    queue.send(TaskId::Ipc, task_msg::MODEL_CHANGED, group::CAR as u16, msg_id as u16);
}

fn register_handlers(registry: &ModuleRegistry, model: &Arc<ModelStore>, queue: &Arc<MessageQueue>) {
    {
        let model = Arc::clone(model);
        let queue = Arc::clone(queue);
        registry.register(
            meter_key(),
            Box::new({
                let model = Arc::clone(&model);
                move |_ft, cmd, _p1, _p2| {
                    let snap = model.snapshot().meter;
                    match cmd {
                        cmd::METER_RPM_SPEED => Some(vec![
                            (snap.speed_real >> 8) as u8,
                            snap.speed_real as u8,
                            (snap.rpm >> 8) as u8,
                            snap.rpm as u8,
                        ]),
                        cmd::METER_SOC => Some(vec![
                            snap.soc,
                            (snap.voltage >> 8) as u8,
                            snap.voltage as u8,
                            (snap.current >> 8) as u8,
                            snap.current as u8,
                            snap.voltage_system,
                            0,
                        ]),
                        _ => None,
                    }
                }
            }),
            Box::new(move |cmd, payload, ack_out| match cmd {
                cmd::METER_RPM_SPEED if payload.len() >= 4 => {
                    model.mutate(|m| {
                        m.meter.speed_real = u16::from_be_bytes([payload[0], payload[1]]);
                        m.meter.rpm = u16::from_be_bytes([payload[2], payload[3]]);
                        m.meter.recompute_display_speed();
                    });
                    notify_model_changed(&queue, car_msg::METER);
                    ack_out.push(0x01);
                    true
                }
                cmd::METER_SOC if payload.len() >= 6 => {
                    model.mutate(|m| {
                        m.meter.soc = payload[0];
                        m.meter.voltage = u16::from_be_bytes([payload[1], payload[2]]);
                        m.meter.current = u16::from_be_bytes([payload[3], payload[4]]);
                        m.meter.voltage_system = payload[5];
                    });
                    notify_model_changed(&queue, car_msg::METER);
                    ack_out.push(0x01);
                    true
                }
                _ => false,
            }),
        );
    }

    {
        let model_send = Arc::clone(model);
        let model_recv = Arc::clone(model);
        let queue = Arc::clone(queue);
        registry.register(
            indicator_key(),
            Box::new(move |_ft, cmd, _p1, _p2| {
                let ind = model_send.snapshot().indicator;
                match cmd {
                    cmd::INDICATOR_STATE => {
                        let bits = ind.bits();
                        Some(vec![bits as u8, (bits >> 8) as u8, 0, 0, 0])
                    }
                    cmd::INDICATOR_ERROR_INFO => Some(vec![0; 5]),
                    _ => None,
                }
            }),
            Box::new(move |cmd, payload, ack_out| match cmd {
                cmd::INDICATOR_STATE if payload.len() >= 2 => {
                    let bits = u16::from_le_bytes([payload[0], payload[1]]);
                    model_recv.mutate(|m| {
                        m.indicator = Indicator::from_bits_truncate(bits);
                    });
                    notify_model_changed(&queue, car_msg::INDICATOR);
                    ack_out.push(0x01);
                    true
                }
                cmd::INDICATOR_ERROR_INFO => {
                    ack_out.push(0x01);
                    true
                }
                _ => false,
            }),
        );
    }

    {
        let model_send = Arc::clone(model);
        let model_recv = Arc::clone(model);
        let queue = Arc::clone(queue);
        registry.register(
            drivinfo_key(),
            Box::new(move |_ft, cmd, _p1, _p2| {
                let dt = model_send.snapshot().drivetrain;
                match cmd {
                    cmd::DRIVINFO_GEAR => Some(vec![dt.gear, dt.drive_mode]),
                    _ => None,
                }
            }),
            Box::new(move |cmd, payload, ack_out| match cmd {
                cmd::DRIVINFO_GEAR if payload.len() >= 2 => {
                    model_recv.mutate(|m| {
                        m.drivetrain.gear = payload[0];
                        m.drivetrain.drive_mode = payload[1];
                    });
                    notify_model_changed(&queue, car_msg::DRIVETRAIN);
                    ack_out.push(0x01);
                    true
                }
                _ => false,
            }),
        );
    }
}

/// Schedulable bridge task tying the SIF feed and the PTL module registry
/// to the shared [`ModelStore`].
pub struct CarInfoTask {
    model: Arc<ModelStore>,
    registry: Arc<ModuleRegistry>,
    queue: Arc<MessageQueue>,
    sif_source: SifSource,
    sif_timer: TickCounter,
    keepalive_timer: TickCounter,
    keepalive_step: u8,
}

impl CarInfoTask {
    pub fn new(
        model: Arc<ModelStore>,
        registry: Arc<ModuleRegistry>,
        queue: Arc<MessageQueue>,
        sif_source: SifSource,
    ) -> Self {
        Self {
            model,
            registry,
            queue,
            sif_source,
            sif_timer: 0,
            keepalive_timer: 0,
            keepalive_step: 0,
        }
    }

    fn request_send(&self, key: FrameType, cmd: u8) {
        self.queue
            .send(TaskId::Ptl, task_msg::REQUEST_SEND_FRAME, key.as_byte() as u16, cmd as u16);
    }

    fn notify_model_changed(&self, msg_id: u8) {
        notify_model_changed(&self.queue, msg_id);
    }

    fn poll_sif(&mut self) {
        if elapsed(&self.sif_timer) < SIF_POLL_INTERVAL_MS {
            return;
        }
        restart(&mut self.sif_timer);

        let Some(buf) = (self.sif_source)() else {
            return;
        };
        if (buf[0], buf[1]) != SIF_MARKER {
            return;
        }

        let sif = decode_sif(&buf);
        let (rpm, speed_real) = hall_counter_to_rpm_and_speed(sif.hall_counter);
        let previous = self.model.snapshot();

        let gear_changed = sif.gear != previous.drivetrain.gear;
        let speed_changed = speed_real != previous.meter.speed_real;
        let new_soc = estimate_soc(previous.meter.voltage, sif.voltage_system, previous.meter.soc);

        let indicator_ready = !sif.status.contains(SifStatus::BOOT_GUARD);
        let indicator_ecu_fault = sif.status.contains(SifStatus::CONTROLLER_FAULT);
        let indicator_sensor_fault = sif.status.contains(SifStatus::THROTTLE_FAULT);
        let indicator_motor_fault =
            sif.status.intersects(SifStatus::MOTOR_FAULT | SifStatus::HALL_FAULT);
        let indicator_parking = sif.status.contains(SifStatus::BRAKE);
        let indicator_changed = indicator_ready != previous.indicator.contains(Indicator::READY)
            || indicator_ecu_fault != previous.indicator.contains(Indicator::ECU_FAULT)
            || indicator_sensor_fault != previous.indicator.contains(Indicator::SENSOR_FAULT)
            || indicator_motor_fault != previous.indicator.contains(Indicator::MOTOR_FAULT)
            || indicator_parking != previous.indicator.contains(Indicator::PARKING);

        self.model.mutate(|m| {
            m.sif = sif;
            m.meter.rpm = rpm;
            m.meter.speed_real = speed_real;
            m.meter.recompute_display_speed();
            m.meter.voltage_system = sif.voltage_system;
            m.meter.current = sif.current as u16 * 10;
            m.meter.soc = new_soc;
            m.drivetrain.gear = sif.gear;
            m.indicator.set(Indicator::READY, indicator_ready);
            m.indicator.set(Indicator::ECU_FAULT, indicator_ecu_fault);
            m.indicator.set(Indicator::SENSOR_FAULT, indicator_sensor_fault);
            m.indicator.set(Indicator::MOTOR_FAULT, indicator_motor_fault);
            m.indicator.set(Indicator::PARKING, indicator_parking);
        });

        if gear_changed {
            self.request_send(drivinfo_key(), cmd::DRIVINFO_GEAR);
            self.notify_model_changed(car_msg::DRIVETRAIN);
        }
        if speed_changed {
            self.request_send(meter_key(), cmd::METER_RPM_SPEED);
            self.notify_model_changed(car_msg::METER);
        }
        if indicator_changed {
            self.request_send(indicator_key(), cmd::INDICATOR_STATE);
            self.notify_model_changed(car_msg::INDICATOR);
        }
    }

    fn run_keepalive_cycle(&mut self) {
        if elapsed(&self.keepalive_timer) < KEEPALIVE_INTERVAL_MS {
            return;
        }
        restart(&mut self.keepalive_timer);

        match self.keepalive_step {
            0 => self.request_send(meter_key(), cmd::METER_SOC),
            1 => self.request_send(meter_key(), cmd::METER_RPM_SPEED),
            2 => self.request_send(drivinfo_key(), cmd::DRIVINFO_GEAR),
            _ => self.request_send(indicator_key(), cmd::INDICATOR_ERROR_INFO),
        }
        self.keepalive_step = (self.keepalive_step + 1) % 4;
    }
}

impl Task for CarInfoTask {
    fn init(&mut self) -> OctopusResult<()> {
        register_handlers(&self.registry, &self.model, &self.queue);
        Ok(())
    }

    fn assert_run(&mut self) -> OctopusResult<()> {
        self.registry.request_running(meter_key());
        self.registry.request_running(indicator_key());
        self.registry.request_running(drivinfo_key());
        restart(&mut self.sif_timer);
        restart(&mut self.keepalive_timer);
        Ok(())
    }

    fn run(&mut self) -> OctopusResult<()> {
        self.poll_sif();
        self.run_keepalive_cycle();
        Ok(())
    }

    fn post_run(&mut self) -> OctopusResult<()> {
        self.registry.release_running(meter_key());
        self.registry.release_running(indicator_key());
        self.registry.release_running(drivinfo_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sif_frame(overrides: impl FnOnce(&mut [u8; 12])) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0] = 0x08;
        buf[1] = 0x61;
        overrides(&mut buf);
        buf
    }

    fn new_task(sif_source: SifSource) -> CarInfoTask {
        CarInfoTask::new(
            Arc::new(ModelStore::new()),
            Arc::new(ModuleRegistry::new()),
            Arc::new(MessageQueue::new()),
            sif_source,
        )
    }

    #[test]
    fn unmarked_sif_frame_is_ignored() {
        let mut calls = 0u32;
        let mut task = new_task(Box::new(move || {
            calls += 1;
            Some([0u8; 12])
        }));
        task.init().unwrap();
        task.assert_run().unwrap();
        task.run().unwrap();

        assert_eq!(task.model.snapshot().meter.rpm, 0);
    }

    #[test]
    fn gear_change_posts_a_send_request_and_a_model_changed_notice() {
        let frame = sif_frame(|b| b[4] = 0x01); // gear = 1
        let mut delivered = false;
        let mut task = new_task(Box::new(move || {
            if delivered {
                None
            } else {
                delivered = true;
                Some(frame)
            }
        }));
        task.init().unwrap();
        task.assert_run().unwrap();
        task.run().unwrap();

        assert_eq!(task.model.snapshot().drivetrain.gear, 1);
        let ptl_msg = task.queue.get(TaskId::Ptl).unwrap();
        assert_eq!(ptl_msg.msg_id, task_msg::REQUEST_SEND_FRAME);
        assert_eq!(ptl_msg.p1, drivinfo_key().as_byte() as u16);

        let ipc_msg = task.queue.get(TaskId::Ipc).unwrap();
        assert_eq!(ipc_msg.msg_id, task_msg::MODEL_CHANGED);
        assert_eq!(ipc_msg.p2, car_msg::DRIVETRAIN as u16);
    }

    #[test]
    fn boot_guard_clears_ready_indicator() {
        let frame = sif_frame(|b| b[2] = 0x02); // bootGuard set
        let mut delivered = false;
        let mut task = new_task(Box::new(move || {
            if delivered {
                None
            } else {
                delivered = true;
                Some(frame)
            }
        }));
        task.init().unwrap();
        task.assert_run().unwrap();
        task.run().unwrap();

        assert!(!task.model.snapshot().indicator.contains(Indicator::READY));
    }

    #[test]
    fn meter_send_handler_reports_current_rpm_speed() {
        let model = Arc::new(ModelStore::new());
        model.mutate(|m| {
            m.meter.speed_real = 42;
            m.meter.rpm = 100;
        });
        let registry = Arc::new(ModuleRegistry::new());
        let queue = Arc::new(MessageQueue::new());
        register_handlers(&registry, &model, &queue);

        let data = registry
            .call_send(meter_key(), cmd::METER_RPM_SPEED, 0, 0)
            .unwrap();
        assert_eq!(u16::from_be_bytes([data[0], data[1]]), 42);
        assert_eq!(u16::from_be_bytes([data[2], data[3]]), 100);
    }

    #[test]
    fn drivinfo_recv_handler_updates_gear_and_acks() {
        let model = Arc::new(ModelStore::new());
        let registry = Arc::new(ModuleRegistry::new());
        let queue = Arc::new(MessageQueue::new());
        register_handlers(&registry, &model, &queue);

        let mut ack = Vec::new();
        let handled = registry
            .call_recv(drivinfo_key(), cmd::DRIVINFO_GEAR, &[3, 1], &mut ack)
            .unwrap();
        assert!(handled);
        assert_eq!(ack, vec![0x01]);
        assert_eq!(model.snapshot().drivetrain.gear, 3);

        let ipc_msg = queue.get(TaskId::Ipc).unwrap();
        assert_eq!(ipc_msg.msg_id, task_msg::MODEL_CHANGED);
        assert_eq!(ipc_msg.p2, car_msg::DRIVETRAIN as u16);
    }

    #[test]
    fn indicator_recv_handler_posts_model_changed_s1() {
        // Scenario S1's shape, but over the indicator module rather than
        // meter: a successful inbound mutation must post a fan-out notice,
        // since the wired binary has no other runtime path to C9.
        let model = Arc::new(ModelStore::new());
        let registry = Arc::new(ModuleRegistry::new());
        let queue = Arc::new(MessageQueue::new());
        register_handlers(&registry, &model, &queue);

        let mut ack = Vec::new();
        let bits = (Indicator::HIGH_BEAM | Indicator::READY).bits();
        let handled = registry
            .call_recv(
                indicator_key(),
                cmd::INDICATOR_STATE,
                &[bits as u8, (bits >> 8) as u8],
                &mut ack,
            )
            .unwrap();
        assert!(handled);
        assert!(model.snapshot().indicator.contains(Indicator::HIGH_BEAM));
        assert!(model.snapshot().indicator.contains(Indicator::READY));

        let ipc_msg = queue.get(TaskId::Ipc).unwrap();
        assert_eq!(ipc_msg.msg_id, task_msg::MODEL_CHANGED);
        assert_eq!(ipc_msg.p1, group::CAR as u16);
        assert_eq!(ipc_msg.p2, car_msg::INDICATOR as u16);
    }

    #[test]
    fn meter_recv_handler_posts_model_changed_s1() {
        // Scenario S1 (spec.md §8): an M2A_METER/CMD_RPM_SPEED frame with
        // data `00 50 00 C8` must update speed_real=80/rpm=200 and post a
        // CAR/METER fan-out notice.
        let model = Arc::new(ModelStore::new());
        let registry = Arc::new(ModuleRegistry::new());
        let queue = Arc::new(MessageQueue::new());
        register_handlers(&registry, &model, &queue);

        let mut ack = Vec::new();
        let handled = registry
            .call_recv(meter_key(), cmd::METER_RPM_SPEED, &[0x00, 0x50, 0x00, 0xC8], &mut ack)
            .unwrap();
        assert!(handled);

        let snap = model.snapshot().meter;
        assert_eq!(snap.speed_real, 80);
        assert_eq!(snap.rpm, 200);
        assert_eq!(snap.speed, 88);

        let ipc_msg = queue.get(TaskId::Ipc).unwrap();
        assert_eq!(ipc_msg.msg_id, task_msg::MODEL_CHANGED);
        assert_eq!(ipc_msg.p1, group::CAR as u16);
        assert_eq!(ipc_msg.p2, car_msg::METER as u16);
    }
}
