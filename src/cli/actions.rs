use anyhow::{Context, Result};
use clap::ArgMatches;
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use crate::{
    api::{http::bind_and_serve, CommandGateway, HttpGateway, LocalGateway},
    backend::{Backend, FixedPosition},
    core::{
        persistence::{self, PersistedSettings},
        spawn_controller, ConnectionController, ControllerSnapshot, ControllerTimings,
    },
    protocol::config::{
        RefreshRate, SerialConfig, TransportConfig, UdpConfig, DEFAULT_BAUD_RATE,
    },
    utils::ports::enumerate_ports,
};

pub async fn run(matches: &ArgMatches) -> Result<()> {
    persistence::set_no_cache(matches.get_flag("no-config-cache"));

    if matches.get_flag("list-ports") {
        return list_ports(matches.get_flag("json"));
    }

    if let Some(addr) = matches.get_one::<SocketAddr>("serve") {
        return serve_backend(*addr, local_backend(matches)).await;
    }

    run_controller(matches).await
}

fn list_ports(json: bool) -> Result<()> {
    let ports = enumerate_ports()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
    } else {
        for port in &ports {
            println!("{port}");
        }
    }
    Ok(())
}

fn local_backend(matches: &ArgMatches) -> Backend {
    let position = matches
        .get_one::<FixedPosition>("position")
        .copied()
        .unwrap_or_default();
    Backend::new(Arc::new(position))
}

fn interrupt_signal() -> Result<flume::Receiver<()>> {
    let (tx, rx) = flume::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(rx)
}

async fn serve_backend(addr: SocketAddr, backend: Backend) -> Result<()> {
    let gateway: Arc<dyn CommandGateway> = Arc::new(LocalGateway::new(backend));
    let interrupt = interrupt_signal()?;

    bind_and_serve(addr, gateway, async move {
        let _ = interrupt.recv_async().await;
        log::info!("Interrupted, shutting down command server");
    })
    .await
}

async fn run_controller(matches: &ArgMatches) -> Result<()> {
    let persisted = persistence::load_settings().unwrap_or_else(|err| {
        log::warn!("Ignoring saved settings: {err:#}");
        None
    });
    let settings = resolve_settings(matches, persisted)?;

    let gateway: Arc<dyn CommandGateway> = match matches.get_one::<String>("remote") {
        Some(url) => {
            log::info!("Using remote backend at {url}");
            Arc::new(HttpGateway::new(url.as_str()))
        }
        None => Arc::new(LocalGateway::new(local_backend(matches))),
    };

    let controller = ConnectionController::new(
        settings.config.clone(),
        settings.refresh_rate,
        ControllerTimings::default(),
    );
    let (handle, task) = spawn_controller(gateway, controller);

    if let Err(err) = persistence::save_settings(&settings) {
        log::warn!("Failed to save settings: {err:#}");
    }

    let interrupt = interrupt_signal()?;
    let json = matches.get_flag("json");
    let mut updates = handle.subscribe();
    report(&updates.borrow_and_update().clone(), json);

    handle.start()?;

    loop {
        tokio::select! {
            _ = interrupt.recv_async() => {
                log::info!("Interrupted, stopping");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                report(&snapshot, json);
            }
        }
    }

    if handle.shutdown().is_ok() {
        task.await.context("Controller task failed")?;
    }
    Ok(())
}

fn report(snapshot: &ControllerSnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(err) => log::warn!("Failed to encode state update: {err}"),
        }
    } else {
        println!(
            "{:?} | {} | {}",
            snapshot.state, snapshot.config, snapshot.refresh_rate
        );
    }
}

/// Saved settings overridden by whatever the command line specifies.
pub fn resolve_settings(
    matches: &ArgMatches,
    persisted: Option<PersistedSettings>,
) -> Result<PersistedSettings> {
    let mut settings = persisted.unwrap_or_default();
    let baud_rate = matches.get_one::<u32>("baud-rate").copied();

    if let Some(port) = matches.get_one::<String>("serial-port") {
        let saved_baud = match &settings.config {
            TransportConfig::Serial(serial) => Some(serial.baud_rate),
            TransportConfig::Udp(_) => None,
        };
        settings.config = TransportConfig::Serial(SerialConfig {
            port: port.clone(),
            baud_rate: baud_rate.or(saved_baud).unwrap_or(DEFAULT_BAUD_RATE),
        });
    } else {
        let udp_port = matches.get_one::<u16>("udp-port").copied();
        let udp_address = matches.get_one::<Ipv4Addr>("udp-address").copied();

        if udp_port.is_some() || udp_address.is_some() {
            let current = match &settings.config {
                TransportConfig::Udp(udp) => udp.clone(),
                TransportConfig::Serial(_) => UdpConfig::default(),
            };
            settings.config = TransportConfig::Udp(UdpConfig {
                port: udp_port.unwrap_or(current.port),
                address: udp_address.unwrap_or(current.address),
            });
        } else if let (Some(baud_rate), TransportConfig::Serial(serial)) =
            (baud_rate, &mut settings.config)
        {
            serial.baud_rate = baud_rate;
        }
    }

    if let Some(refresh_rate) = matches.get_one::<RefreshRate>("refresh-rate") {
        settings.refresh_rate = *refresh_rate;
    }

    settings
        .config
        .validate()
        .context("Invalid transport configuration")?;
    Ok(settings)
}
