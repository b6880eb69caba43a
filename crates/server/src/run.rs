// Daemon assembly: transport, controllers, heartbeat, and the dispatch loop
// that ties them together. `reset` tears the whole set down and rebuilds it in
// place; the rebuild is sequential, not atomic, and a crash mid-reset needs a
// process restart.

use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use rusttune_core::Event;
use rusttune_udp::UdpService;

use crate::config::Config;
use crate::hw::{PinDriver, ServoDriver, SimPins, SimServo};
use crate::relays::RelayBank;
use crate::router::{CommandRouter, Outcome};
use crate::servo::{self, ServoId, ServoTiming};

/// Hardware backends, injected at construction. `sim()` is the log-only set
/// used when the unit runs without its servo board or relay header attached.
pub struct Drivers {
    pub tx_servo: Box<dyn ServoDriver>,
    pub ant_servo: Box<dyn ServoDriver>,
    pub pins: Box<dyn PinDriver>,
}

impl Drivers {
    pub fn sim() -> Self {
        Self {
            tx_servo: Box::new(SimServo::new("tx")),
            ant_servo: Box::new(SimServo::new("ant")),
            pins: Box::new(SimPins::new()),
        }
    }
}

enum LoopEnd {
    Reset,
    Shutdown,
}

/// Run the remote tuner until `shutdown` fires. `drivers` is called once per
/// build, so a `reset` request gets a fresh set of backends.
pub async fn run(
    cfg: Config,
    mut drivers: impl FnMut() -> Drivers,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        let link = UdpService::bind(cfg.udp.clone())
            .await
            .context("binding request socket")?;
        let (mut router, pumps) = build(&cfg, &link, drivers())?;
        let heartbeat = tokio::spawn(heartbeat_loop(link.clone(), cfg.heartbeat_period));
        info!("remote tuner ready");

        let end = dispatch_loop(&link, &mut router, &mut shutdown).await;

        // Teardown order matters: stop the listener, then the controllers,
        // then wait for every task holding a socket clone to finish so the
        // request port is actually free before a rebind.
        link.shutdown();
        router.shutdown().await;
        for pump in pumps {
            let _ = pump.await;
        }
        let _ = heartbeat.await;
        link.closed().await;

        match end {
            LoopEnd::Reset => {
                info!("rebuilding transport and controllers");
                sleep(cfg.reset_settle).await;
            }
            LoopEnd::Shutdown => {
                info!("remote tuner stopped");
                return Ok(());
            }
        }
    }
}

fn build(
    cfg: &Config,
    link: &UdpService,
    drivers: Drivers,
) -> anyhow::Result<(CommandRouter, Vec<JoinHandle<()>>)> {
    let mut pumps = Vec::new();
    let tx_servo = spawn_servo(ServoId::Tx, drivers.tx_servo, cfg.tx_pulse, link, &mut pumps);
    let ant_servo = spawn_servo(
        ServoId::Ant,
        drivers.ant_servo,
        cfg.ant_pulse,
        link,
        &mut pumps,
    );

    let mut relays = RelayBank::new(drivers.pins, cfg.relay_dwell);
    if !cfg.pin_map.is_empty() {
        relays
            .init_pins(&cfg.pin_map)
            .context("applying the persisted pin map")?;
    }

    Ok((CommandRouter::new(tx_servo, ant_servo, relays), pumps))
}

fn spawn_servo(
    id: ServoId,
    driver: Box<dyn ServoDriver>,
    pulse: (u16, u16),
    link: &UdpService,
    pumps: &mut Vec<JoinHandle<()>>,
) -> servo::ServoHandle {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let handle = servo::spawn(id, driver, pulse, ServoTiming::default(), progress_tx);

    // Pump intermediate angles out as events; ends when the servo loop drops
    // its sender.
    let link = link.clone();
    pumps.push(tokio::spawn(async move {
        while let Some(angle) = progress_rx.recv().await {
            let event = match id {
                ServoId::Tx => Event::TxProgress(angle),
                ServoId::Ant => Event::AntProgress(angle),
            };
            if let Err(e) = link.send_event(&event).await {
                warn!(servo = id.label(), error = %e, "progress send failed");
            }
        }
        debug!(servo = id.label(), "progress pump stopped");
    }));

    handle
}

async fn dispatch_loop(
    link: &UdpService,
    router: &mut CommandRouter,
    shutdown: &mut watch::Receiver<bool>,
) -> LoopEnd {
    let mut frames = link.commands();
    loop {
        tokio::select! {
            _ = shutdown.changed() => return LoopEnd::Shutdown,
            frame = frames.recv() => match frame {
                Ok(raw) => {
                    if let Some(Outcome::Reset) = router.handle(&raw).await {
                        return LoopEnd::Reset;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "request backlog overflowed");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    error!("request listener stopped unexpectedly");
                    return LoopEnd::Shutdown;
                }
            }
        }
    }
}

/// One-way liveness beacon; never sends before a peer has contacted us.
async fn heartbeat_loop(link: UdpService, period: Duration) {
    let mut tick = interval(period);
    loop {
        tick.tick().await;
        if link.is_terminated() {
            break;
        }
        if let Err(e) = link.send_event(&Event::Heartbeat).await {
            warn!(error = %e, "heartbeat send failed");
        }
    }
    debug!("heartbeat stopped");
}
