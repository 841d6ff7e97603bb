use clap::{Parser, ValueEnum};
use core::cell::RefCell;
use embassy_executor::{Executor, Spawner};
use embassy_net::{Config, Ipv4Address, Ipv4Cidr, Runner, StackResources};
use embassy_net_tuntap::TunTapDevice;
use embassy_time::{Delay, Duration, Timer};
use embedded_hal_bus::i2c::RefCellDevice;
use heapless::Vec;
use camcar_core::mk_static;
use camcar_core::utils::{
    controllers::{CarController, CompanionConfig, CompanionLink, DirectDrive},
    http, CONTROL_LINK,
};
use rand_core::{OsRng, RngCore};
use static_cell::StaticCell;
use tracing::{error, info};

mod sim;
use sim::{SimulatedCompanion, SimulatedPin, SimulatedPwm};

type DirectCar = CarController<DirectDrive<SimulatedPwm, SimulatedPin>>;
type CompanionCar =
    CarController<CompanionLink<RefCellDevice<'static, SimulatedCompanion>, Delay>>;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Drive {
    /// Steering PWM and direction lines on this board
    Direct,
    /// Commands forwarded to the companion MCU over I2C
    Companion,
}

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts
{
    /// TAP device name
    #[clap(long, default_value = "tap0")]
    tap: String,
    /// use a static IP instead of DHCP
    #[clap(long)]
    static_ip: bool,
    /// HTTP port for `/controls` and `/status`
    #[clap(long, default_value_t = 8000)]
    port: u16,
    /// which actuator backend to simulate
    #[clap(long, value_enum, default_value_t = Drive::Direct)]
    drive: Drive,
    /// I2C address of the simulated companion
    #[clap(long, default_value_t = camcar_core::utils::controllers::companion::COMPANION_ADDRESS)]
    companion_address: u8,
    /// companion never acknowledges, so every command times out
    #[clap(long)]
    drop_acks: bool,
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, TunTapDevice>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn direct_task(mut car: DirectCar) -> ! {
    car.run(&CONTROL_LINK).await
}

#[embassy_executor::task]
async fn companion_task(mut car: CompanionCar) -> ! {
    car.run(&CONTROL_LINK).await
}

/// Log the published actuator state as JSON whenever it changes.
#[embassy_executor::task]
async fn state_log_task() -> ! {
    let mut last = None;
    loop {
        let state = CONTROL_LINK.snapshot();
        if last != Some(state) {
            match serde_json::to_string(&state) {
                Ok(json) => info!(state = %json, "actuator state"),
                Err(e) => error!("failed to serialize state: {e}"),
            }
            last = Some(state);
        }
        Timer::after(Duration::from_millis(250)).await;
    }
}

fn spawn_car(
    spawner: &Spawner,
    opts: &Opts,
) -> Result<(), embassy_executor::SpawnError> {
    match opts.drive {
        Drive::Direct => {
            let mut car = CarController::new(DirectDrive::new(
                SimulatedPwm::new(),
                SimulatedPin::new("line_a"),
                SimulatedPin::new("line_b"),
            ));
            if let Err(e) = car.init() {
                error!("direct drive init failed: {e:?}");
            }
            spawner.spawn(direct_task(car))
        }
        Drive::Companion => {
            let bus = mk_static!(
                RefCell<SimulatedCompanion>,
                RefCell::new(SimulatedCompanion::new(opts.companion_address, opts.drop_acks))
            );
            let config = CompanionConfig {
                address: opts.companion_address,
                ..CompanionConfig::default()
            };
            let mut car = CarController::new(CompanionLink::on_shared_bus(bus, Delay, config));
            if let Err(e) = car.init() {
                error!("companion init failed: {e:?}");
            }
            spawner.spawn(companion_task(car))
        }
    }
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner) {
    let opts: Opts = Opts::parse();
    info!(drive = ?opts.drive, "Starting simulated car");

    if let Err(e) = spawn_car(&spawner, &opts) {
        error!("failed to spawn controller: {e:?}");
        return;
    }
    if let Err(e) = spawner.spawn(state_log_task()) {
        error!("failed to spawn state logger: {e:?}");
    }

    // Network on a TAP device
    let device = match TunTapDevice::new(&opts.tap) {
        Ok(device) => device,
        Err(e) => {
            error!("cannot open TAP device {}: {e}", opts.tap);
            return;
        }
    };
    let config = if opts.static_ip {
        Config::ipv4_static(embassy_net::StaticConfigV4 {
            address: Ipv4Cidr::new(Ipv4Address::new(192, 168, 69, 2), 24),
            dns_servers: Vec::new(),
            gateway: Some(Ipv4Address::new(192, 168, 69, 1)),
        })
    } else {
        Config::dhcpv4(Default::default())
    };
    let mut seed_buf = [0; 8];
    OsRng.fill_bytes(&mut seed_buf);
    let seed = u64::from_le_bytes(seed_buf);

    let (stack, runner) = embassy_net::new(
        device,
        config,
        mk_static!(StackResources<3>, StackResources::<3>::new()),
        seed,
    );
    if let Err(e) = spawner.spawn(net_task(runner)) {
        error!("failed to spawn network task: {e:?}");
        return;
    }

    info!("Waiting for network configuration...");
    stack.wait_config_up().await;

    info!("Starting control server on port {}", opts.port);
    http(0, opts.port, stack, None).await;
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        if let Err(e) = spawner.spawn(main_task(spawner)) {
            error!("failed to spawn main task: {e:?}");
        }
    });
}
