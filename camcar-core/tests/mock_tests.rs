use core::{cell::RefCell, pin::pin};

use camcar_core::utils::{
    connection::server::{dispatch, ControlQuery},
    controllers::{
        companion::{CommandFamily, COMPANION_ADDRESS},
        Actuator, ActuatorState, CarController, CompanionConfig, CompanionError, CompanionLink,
        ControlLink, DirectDrive,
    },
    controls::{decode, ControlCommand, ControlStatus, DriveMode, Gear},
};
use embassy_futures::{
    block_on,
    join::join,
    select::{select, Either},
};
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use embedded_hal_mock::eh1::{
    delay::NoopDelay,
    digital::{Mock as PinMock, State, Transaction as PinTrans},
    i2c::{Mock as I2cMock, Transaction as I2cTrans},
    pwm::{Mock as PwmMock, Transaction as PwmTrans},
};

/// Maximum duty reported by the mocked steering channel.
const MAX_DUTY: u16 = 1023;

struct DirectRig {
    pwm: PwmMock,
    a: PinMock,
    b: PinMock,
}

impl DirectRig {
    fn new(
        pwm: &[PwmTrans],
        a: &[PinTrans],
        b: &[PinTrans],
    ) -> Self {
        DirectRig {
            pwm: PwmMock::new(pwm),
            a: PinMock::new(a),
            b: PinMock::new(b),
        }
    }

    fn controller(&self) -> CarController<DirectDrive<PwmMock, PinMock>> {
        CarController::new(DirectDrive::new(
            self.pwm.clone(),
            self.a.clone(),
            self.b.clone(),
        ))
    }

    fn done(&mut self) {
        self.pwm.done();
        self.a.done();
        self.b.done();
    }
}

/// Run one `/controls` query through `dispatch` and the controller task.
fn send<A: Actuator>(
    ctrl: &mut CarController<A>,
    link: &ControlLink,
    query: Option<&str>,
) -> ControlStatus {
    let mut request = pin!(dispatch(link, ControlQuery(decode(query))));
    match block_on(select(request.as_mut(), ctrl.serve_one(link))) {
        // Rejected before reaching the controller.
        Either::First(status) => status,
        Either::Second(()) => block_on(request),
    }
}

fn set(state: State) -> PinTrans {
    PinTrans::set(state)
}

fn nack() -> ErrorKind {
    ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
}

fn companion_config(poll_attempts: u8) -> CompanionConfig {
    CompanionConfig {
        poll_attempts,
        ..CompanionConfig::default()
    }
}

#[test]
fn steer_midpoint_sets_half_duty() {
    let mut rig = DirectRig::new(
        &[
            PwmTrans::max_duty_cycle(MAX_DUTY),
            PwmTrans::set_duty_cycle(509),
        ],
        &[],
        &[],
    );
    let mut ctrl = rig.controller();
    let link = ControlLink::new();

    assert_eq!(send(&mut ctrl, &link, Some("steer=127")), ControlStatus::Ok);
    assert_eq!(ctrl.state().steer, 127);
    assert_eq!(link.snapshot().steer, 127);
    rig.done();
}

#[test]
fn steer_out_of_range_touches_nothing() {
    let mut rig = DirectRig::new(&[], &[], &[]);
    let mut ctrl = rig.controller();
    let link = ControlLink::new();
    let before = ctrl.state();

    assert_eq!(send(&mut ctrl, &link, Some("steer=256")), ControlStatus::BadRequest);
    assert_eq!(send(&mut ctrl, &link, Some("steer=12a")), ControlStatus::BadRequest);
    assert_eq!(send(&mut ctrl, &link, Some("gear=X")), ControlStatus::BadRequest);
    assert_eq!(send(&mut ctrl, &link, Some("speed=1")), ControlStatus::BadRequest);
    assert_eq!(send(&mut ctrl, &link, None), ControlStatus::InternalServerError);

    assert_eq!(ctrl.state(), before);
    assert_eq!(link.snapshot(), before);
    rig.done();
}

#[test]
fn gear_backward_sets_reverse_code() {
    let mut rig = DirectRig::new(&[], &[set(State::Low)], &[set(State::High)]);
    let mut ctrl = rig.controller();
    let link = ControlLink::new();

    assert_eq!(send(&mut ctrl, &link, Some("gear=B")), ControlStatus::Ok);
    assert_eq!(ctrl.state().gear, Gear::Backward);
    rig.done();
}

#[test]
fn gear_codes_are_exclusive() {
    let mut rig = DirectRig::new(
        &[],
        &[set(State::High), set(State::High)],
        &[set(State::Low), set(State::High)],
    );
    let mut ctrl = rig.controller();
    let link = ControlLink::new();

    assert_eq!(send(&mut ctrl, &link, Some("gear=F")), ControlStatus::Ok);
    assert_eq!(send(&mut ctrl, &link, Some("gear=N")), ControlStatus::Ok);
    assert_eq!(ctrl.state().gear, Gear::Neutral);
    rig.done();
}

#[test]
fn mode_toggle_twice_restores_flag() {
    // Avoidance drives (L, L); returning to manual drives forward (H, L).
    let mut rig = DirectRig::new(
        &[],
        &[set(State::Low), set(State::High)],
        &[set(State::Low), set(State::Low)],
    );
    let mut ctrl = rig.controller();
    let link = ControlLink::new();
    let original = ctrl.state().mode;

    assert_eq!(send(&mut ctrl, &link, Some("mode")), ControlStatus::Ok);
    assert_eq!(ctrl.state().mode, DriveMode::ObstacleAvoidance);
    assert_eq!(send(&mut ctrl, &link, Some("mode=x")), ControlStatus::Ok);
    assert_eq!(ctrl.state().mode, original);
    assert_eq!(ctrl.state().gear, Gear::Forward);
    rig.done();
}

#[test]
fn gear_during_avoidance_drives_outputs() {
    let mut rig = DirectRig::new(
        &[],
        &[set(State::Low), set(State::Low), set(State::High)],
        &[set(State::Low), set(State::High), set(State::Low)],
    );
    let mut ctrl = rig.controller();
    let link = ControlLink::new();

    assert_eq!(send(&mut ctrl, &link, Some("mode")), ControlStatus::Ok);
    assert_eq!(send(&mut ctrl, &link, Some("gear=B")), ControlStatus::Ok);
    assert_eq!(ctrl.state().gear, Gear::Backward);
    assert_eq!(ctrl.state().mode, DriveMode::ObstacleAvoidance);

    assert_eq!(send(&mut ctrl, &link, Some("mode")), ControlStatus::Ok);
    assert_eq!(ctrl.state().mode, DriveMode::Manual);
    assert_eq!(ctrl.state().gear, Gear::Forward);
    rig.done();
}

#[test]
fn init_drives_neutral_outputs() {
    let mut rig = DirectRig::new(
        &[
            PwmTrans::max_duty_cycle(255),
            PwmTrans::set_duty_cycle(127),
        ],
        &[set(State::High)],
        &[set(State::High)],
    );
    let mut ctrl = rig.controller();

    ctrl.init().unwrap();
    assert_eq!(ctrl.state(), ActuatorState::NEUTRAL);
    rig.done();
}

#[test]
fn companion_steer_handshake() {
    let expectations = [
        I2cTrans::write(COMPANION_ADDRESS, vec![0x01, 127]),
        I2cTrans::read(COMPANION_ADDRESS, vec![CommandFamily::Steer.ok_sentinel()]),
    ];
    let mut i2c = I2cMock::new(&expectations);
    let companion = CompanionLink::new(i2c.clone(), NoopDelay::new(), CompanionConfig::default());
    let mut ctrl = CarController::new(companion);
    let link = ControlLink::new();

    assert_eq!(send(&mut ctrl, &link, Some("steer=127")), ControlStatus::Ok);
    assert_eq!(ctrl.state().steer, 127);
    i2c.done();
}

#[test]
fn companion_ack_after_polling() {
    let expectations = [
        I2cTrans::write(COMPANION_ADDRESS, vec![0x02, b'B']),
        I2cTrans::read(COMPANION_ADDRESS, vec![0]).with_error(nack()),
        I2cTrans::read(COMPANION_ADDRESS, vec![0]).with_error(nack()),
        I2cTrans::read(COMPANION_ADDRESS, vec![CommandFamily::Gear.ok_sentinel()]),
    ];
    let mut i2c = I2cMock::new(&expectations);
    let companion = CompanionLink::new(i2c.clone(), NoopDelay::new(), companion_config(3));
    let mut ctrl = CarController::new(companion);
    let link = ControlLink::new();

    assert_eq!(send(&mut ctrl, &link, Some("gear=B")), ControlStatus::Ok);
    assert_eq!(ctrl.state().gear, Gear::Backward);
    i2c.done();
}

#[test]
fn companion_timeout_is_server_error() {
    let expectations = [
        I2cTrans::write(COMPANION_ADDRESS, vec![0x01, 200]),
        I2cTrans::read(COMPANION_ADDRESS, vec![0]).with_error(nack()),
        I2cTrans::read(COMPANION_ADDRESS, vec![0]).with_error(nack()),
        I2cTrans::read(COMPANION_ADDRESS, vec![0]).with_error(nack()),
    ];
    let mut i2c = I2cMock::new(&expectations);
    let companion = CompanionLink::new(i2c.clone(), NoopDelay::new(), companion_config(3));
    let mut ctrl = CarController::new(companion);
    let link = ControlLink::new();
    let before = ctrl.state();

    assert_eq!(
        send(&mut ctrl, &link, Some("steer=200")),
        ControlStatus::InternalServerError
    );
    assert_eq!(ctrl.state(), before);
    assert_eq!(link.snapshot(), before);
    i2c.done();
}

#[test]
fn companion_wrong_ack_is_rejected() {
    let expectations = [
        I2cTrans::write(COMPANION_ADDRESS, vec![0x03, 1]),
        I2cTrans::read(COMPANION_ADDRESS, vec![0xEE]),
    ];
    let mut i2c = I2cMock::new(&expectations);
    let mut companion =
        CompanionLink::new(i2c.clone(), NoopDelay::new(), CompanionConfig::default());

    match companion.handshake(CommandFamily::Mode, 1) {
        Err(CompanionError::Rejected { family, ack }) => {
            assert_eq!(family, CommandFamily::Mode);
            assert_eq!(ack, 0xEE);
        }
        other => panic!("unexpected handshake result: {other:?}"),
    }
    i2c.done();
}

#[test]
fn companion_write_failure_is_bus_error() {
    let expectations =
        [I2cTrans::write(COMPANION_ADDRESS, vec![0x01, 10]).with_error(ErrorKind::Other)];
    let mut i2c = I2cMock::new(&expectations);
    let mut companion =
        CompanionLink::new(i2c.clone(), NoopDelay::new(), CompanionConfig::default());

    assert!(matches!(
        companion.handshake(CommandFamily::Steer, 10),
        Err(CompanionError::Bus(ErrorKind::Other))
    ));
    i2c.done();
}

#[test]
fn companion_mode_toggle_is_one_frame_each_way() {
    let expectations = [
        I2cTrans::write(COMPANION_ADDRESS, vec![0x03, 1]),
        I2cTrans::read(COMPANION_ADDRESS, vec![CommandFamily::Mode.ok_sentinel()]),
        I2cTrans::write(COMPANION_ADDRESS, vec![0x03, 0]),
        I2cTrans::read(COMPANION_ADDRESS, vec![CommandFamily::Mode.ok_sentinel()]),
    ];
    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let companion =
        CompanionLink::on_shared_bus(&i2c_bus, NoopDelay::new(), CompanionConfig::default());
    let mut ctrl = CarController::new(companion);
    let link = ControlLink::new();

    assert_eq!(send(&mut ctrl, &link, Some("mode")), ControlStatus::Ok);
    assert_eq!(send(&mut ctrl, &link, Some("mode")), ControlStatus::Ok);
    assert_eq!(ctrl.state().mode, DriveMode::Manual);
    assert_eq!(ctrl.state().gear, Gear::Forward);
    i2c_bus.borrow_mut().done();
}

#[test]
fn companion_failed_return_keeps_avoidance() {
    let expectations = [
        I2cTrans::write(COMPANION_ADDRESS, vec![0x03, 1]),
        I2cTrans::read(COMPANION_ADDRESS, vec![CommandFamily::Mode.ok_sentinel()]),
        I2cTrans::write(COMPANION_ADDRESS, vec![0x03, 0]),
        I2cTrans::read(COMPANION_ADDRESS, vec![0]).with_error(nack()),
    ];
    let mut i2c = I2cMock::new(&expectations);
    let companion = CompanionLink::new(i2c.clone(), NoopDelay::new(), companion_config(1));
    let mut ctrl = CarController::new(companion);
    let link = ControlLink::new();

    assert_eq!(send(&mut ctrl, &link, Some("mode")), ControlStatus::Ok);
    assert_eq!(send(&mut ctrl, &link, Some("mode")), ControlStatus::InternalServerError);
    assert_eq!(ctrl.state().mode, DriveMode::ObstacleAvoidance);
    assert_eq!(link.snapshot().mode, DriveMode::ObstacleAvoidance);
    i2c.done();
}

#[test]
fn link_round_trip_publishes_state() {
    let mut rig = DirectRig::new(&[], &[set(State::Low)], &[set(State::High)]);
    let mut ctrl = rig.controller();
    let link = ControlLink::new();

    let query = ControlQuery(decode(Some("gear=B")));
    let (_, status) = block_on(join(ctrl.serve_one(&link), dispatch(&link, query)));

    assert_eq!(status, ControlStatus::Ok);
    assert_eq!(link.snapshot().gear, Gear::Backward);
    assert_eq!(ctrl.state().gear, Gear::Backward);
    rig.done();
}

#[test]
fn link_reports_actuation_failure() {
    let expectations = [
        I2cTrans::write(COMPANION_ADDRESS, vec![0x01, 40]),
        I2cTrans::read(COMPANION_ADDRESS, vec![0]).with_error(nack()),
    ];
    let mut i2c = I2cMock::new(&expectations);
    let mut ctrl = CarController::new(CompanionLink::new(
        i2c.clone(),
        NoopDelay::new(),
        companion_config(1),
    ));
    let link = ControlLink::new();

    let (_, status) = block_on(join(
        ctrl.serve_one(&link),
        dispatch(&link, ControlQuery(decode(Some("steer=40")))),
    ));

    assert_eq!(status, ControlStatus::InternalServerError);
    assert_eq!(link.snapshot(), ActuatorState::NEUTRAL);
    i2c.done();
}

#[test]
fn link_rejects_bad_query_without_submitting() {
    let link = ControlLink::new();
    let status = block_on(dispatch(&link, ControlQuery(decode(Some("steer=-1")))));
    assert_eq!(status, ControlStatus::BadRequest);
}

#[test]
fn link_serializes_consecutive_commands() {
    let mut rig = DirectRig::new(
        &[
            PwmTrans::max_duty_cycle(MAX_DUTY),
            PwmTrans::set_duty_cycle(0),
        ],
        &[set(State::Low)],
        &[set(State::Low)],
    );
    let mut ctrl = rig.controller();
    let link = ControlLink::new();

    for command in [ControlCommand::Steer { duty: 0 }, ControlCommand::ToggleMode] {
        let (_, result) = block_on(join(ctrl.serve_one(&link), link.submit(command)));
        assert!(result.is_ok());
    }

    let state = link.snapshot();
    assert_eq!(state.steer, 0);
    assert_eq!(state.mode, DriveMode::ObstacleAvoidance);
    rig.done();
}

#[test]
fn abandoned_request_outcome_is_not_delivered_to_the_next() {
    let mut rig = DirectRig::new(
        &[
            PwmTrans::max_duty_cycle(MAX_DUTY),
            PwmTrans::set_duty_cycle(40),
        ],
        &[set(State::Low)],
        &[set(State::High)],
    );
    let mut ctrl = rig.controller();
    let link = ControlLink::new();

    // The waiter gives up once its request is queued.
    let first = block_on(select(link.submit(ControlCommand::Steer { duty: 10 }), async {}));
    assert!(matches!(first, Either::Second(())));

    // The controller still applies it, publishing an outcome nobody awaits.
    block_on(ctrl.serve_one(&link));

    let (_, second) = block_on(join(
        ctrl.serve_one(&link),
        link.submit(ControlCommand::Shift {
            gear: Gear::Backward,
        }),
    ));
    let state = second.unwrap();
    assert_eq!(state.gear, Gear::Backward);
    assert_eq!(state.steer, 10);
    rig.done();
}
