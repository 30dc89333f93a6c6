// AirChat: serverless chat over the AWDL link. Sends to a multicast group, hears peers via tcpdump.

mod capture;
mod config;
mod console;
mod link;
mod sender;
mod session;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use airchat_core::command::sanitize_nickname;
use airchat_core::ChatCore;
use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::capture::CaptureStream;
use crate::console::Console;
use crate::link::LinkActivity;
use crate::sender::ReliableSender;
use crate::session::Session;
use crate::transport::Transport;

#[derive(Parser, Debug)]
#[command(name = "airchat", version, about = "Serverless broadcast chat over AWDL")]
struct Cli {
    /// Config file (default: ~/.config/airchat/config.toml, then /etc/airchat/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Nickname to use instead of prompting
    #[arg(short, long)]
    nick: Option<String>,
    /// Interface to capture on and send through
    #[arg(short, long)]
    interface: Option<String>,
    /// Chat UDP port
    #[arg(short, long)]
    port: Option<u16>,
    /// Verbose logging (same as DEBUG=1)
    #[arg(short, long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let debug = cli.debug || std::env::var_os("DEBUG").is_some();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if debug { "debug" } else { "info" }),
    )
    .init();

    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(interface) = cli.interface.clone() {
        cfg.interface = interface;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(nick) = cli.nick.clone() {
        cfg.nickname = Some(nick);
    }

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(cfg));
    // Stdin is read on a blocking thread that never returns on its own.
    rt.shutdown_timeout(Duration::from_millis(250));
    result
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let transport = Transport::open(&cfg.group, cfg.port, &cfg.interface)
        .await
        .with_context(|| format!("cannot open chat socket on {}", cfg.interface))?;
    log::debug!("sending to {}", transport.destination());

    let immediate = capture::supports_immediate_mode(&cfg.tcpdump).await;
    if !immediate {
        log::warn!("{} has no --immediate-mode; incoming messages may lag", cfg.tcpdump);
    }

    let activity = Arc::new(LinkActivity::new());
    let trigger = link::trigger_from_argv(&cfg.link_trigger);
    if !cfg.skip_link_check {
        let stream = CaptureStream::spawn(
            &cfg.tcpdump,
            immediate,
            &cfg.interface,
            &format!("not port {}", cfg.port),
            None,
        )?;
        let monitor = activity.clone();
        tokio::spawn(async move {
            let err = link::run_activity_monitor(stream, monitor).await;
            log::warn!("link activity monitor stopped: {err}");
        });
        log::info!("checking for activity on {}", cfg.interface);
        if !link::wait_for_activity(&activity, cfg.link_check()).await {
            log::info!("no activity on {}; invoking link trigger", cfg.interface);
            trigger.invoke();
        }
    }

    let console = Arc::new(Console::new());
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let nickname = match cfg.nickname.as_deref() {
        Some(nick) => nick.to_owned(),
        None => {
            console.prompt("Nickname: ");
            input.next_line().await?.unwrap_or_default()
        }
    };
    let nickname = pick_nickname(&nickname, std::env::var("USER").ok().as_deref());

    let mut core = ChatCore::new(&nickname);
    core.set_preamble(&cfg.preamble);
    core.set_ping_interval(cfg.ping_interval());

    let sender = Arc::new(ReliableSender::new(
        Arc::new(transport),
        &cfg.preamble,
        cfg.reliability_factor,
        cfg.retransmit_delay(),
    ));
    let session = Session::new(core, sender, console.clone(), activity.clone());

    let chat_stream = CaptureStream::spawn(
        &cfg.tcpdump,
        immediate,
        &cfg.interface,
        &format!("udp and port {}", cfg.port),
        cfg.capture_stall(),
    )?;
    let mut capture_task = tokio::spawn(session.clone().run_capture(chat_stream));

    console.help();
    session.join().await;
    session.show_who().await;

    let liveness = tokio::spawn(session.clone().run_liveness(cfg.ping_interval()));
    let watchdog = (!cfg.skip_link_check).then(|| {
        tokio::spawn(link::run_watchdog(
            activity.clone(),
            cfg.link_idle(),
            cfg.link_check(),
            trigger.clone(),
        ))
    });

    let mut input_task = tokio::spawn(session.clone().run_input(input));
    let outcome = tokio::select! {
        res = &mut capture_task => match res {
            Ok(err) => Err(anyhow::Error::new(err).context("lost the capture source")),
            Err(e) => Err(anyhow::Error::new(e).context("capture task failed")),
        },
        _ = &mut input_task => Ok(()),
        res = shutdown_signal() => res,
    };

    liveness.abort();
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }
    input_task.abort();
    session.leave().await;
    capture_task.abort();
    if let Err(e) = &outcome {
        log::error!("{e:#}");
    }
    outcome
}

/// Sanitised nickname from what the user typed, falling back to the login name, then "anon".
fn pick_nickname(typed: &str, login: Option<&str>) -> String {
    [Some(typed), login]
        .into_iter()
        .flatten()
        .map(sanitize_nickname)
        .find(|n| !n.is_empty())
        .unwrap_or_else(|| "anon".to_string())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
