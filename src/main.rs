//! The continuo host binary.
//!
//! Startup order matters: resolve plugins, probe the audio device, build the
//! engine, bring up the OSC endpoint, start audio, start MIDI ingress,
//! install signal handlers, launch front-ends, then run the liaison loop
//! until a signal or the last front-end asks us to exit.

mod cli;
mod gui;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use continuo_engine::{
    shutdown, AudioOutput, Engine, EngineConfig, Liaison, MidiIngress, OscServer,
    EVENT_BUFFER_SIZE,
};
use continuo_plugin::{PluginLibrary, PluginRegistry, PluginSpec};

fn main() -> anyhow::Result<()> {
    // Our own process group, so the final hangup reaches every front-end.
    #[cfg(unix)]
    unsafe {
        libc::setsid();
    }

    let (args, specs) = match single_library_from_argv0() {
        Some(spec) => (cli::Args::for_single_library(), vec![spec]),
        None => {
            let args = cli::Args::parse();
            let specs = cli::parse_specs(&args.plugins)?;
            (args, specs)
        }
    };

    init_tracing(args.verbose);
    info!("starting...");

    let mut registry = PluginRegistry::new();
    let mut resolved = Vec::with_capacity(specs.len());
    for spec in &specs {
        let plugin = registry
            .resolve(spec)
            .with_context(|| format!("resolving plugin \"{}\"", spec.library))?;
        resolved.push((plugin, spec.count));
    }

    let mut audio = AudioOutput::new().context("connecting to the audio device")?;
    let engine = Engine::build(
        &resolved,
        EngineConfig {
            sample_rate: audio.sample_rate(),
            block_size: audio.block_size(),
            ring_capacity: EVENT_BUFFER_SIZE,
        },
    )
    .context("building the engine")?;
    let shared = engine.shared();
    let producer = engine.producer();

    let client_name = format!(
        "{:.20} [continuo:{}]",
        resolved[0].0.label,
        std::process::id()
    );

    let osc = OscServer::bind(shared.clone(), producer.clone(), args.osc_port)
        .context("binding the OSC endpoint")?;
    let host_url = osc.url().to_string();
    info!("registering {host_url}");
    let liaison = Liaison::new(shared.clone(), osc.socket().try_clone()?);
    let _osc_thread = osc.spawn()?;

    audio.start(engine).context("starting the audio stream")?;
    let _midi = MidiIngress::spawn(&client_name, args.midi_port.clone(), producer)
        .context("opening the MIDI sequencer port")?;

    shutdown::install_signal_handlers();
    gui::launch_all(&shared, &host_url);
    info!("ready");

    shutdown::clear_exit();
    liaison.run();

    // Disconnect the audio server before releasing plugins, so no block
    // call is in flight during release.
    audio.stop();
    shutdown::release_instances(&shared);

    #[cfg(unix)]
    unsafe {
        libc::kill(0, libc::SIGHUP);
    }
    Ok(())
}

/// The run-plugin-from-executable-name special case: invoked with no
/// arguments under a different name, and `<name>.so` resolves as a plugin
/// library, run that library's first plugin as the sole instance.
fn single_library_from_argv0() -> Option<PluginSpec> {
    let argv: Vec<String> = std::env::args().collect();
    if argv.len() != 1 {
        return None;
    }
    let basename = Path::new(&argv[0]).file_name()?.to_str()?;
    if basename.is_empty() || basename == "continuo" {
        return None;
    }
    let library = format!("{basename}.so");
    PluginLibrary::open(&library).ok()?;
    Some(PluginSpec {
        library,
        label: None,
        count: 1,
    })
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .init();
}
