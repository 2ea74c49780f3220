#![forbid(unsafe_code)]

// Native-only CLI; wasm builds of the workspace get an empty entry point.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::path::PathBuf;

    use anyhow::{Context, Result};
    use clap::Parser;
    use pspge_replay::{load_config, replay, words_from_bytes, ReplayOptions, DEFAULT_LOAD_ADDR};

    fn parse_u32(raw: &str) -> Result<u32, String> {
        let raw = raw.trim();
        let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
            None => raw.replace('_', "").parse(),
        };
        parsed.map_err(|err| format!("invalid address {raw:?}: {err}"))
    }

    #[derive(Debug, Parser)]
    #[command(
        name = "pspge-replay",
        version,
        about = "Runs a raw GE display list through the list front end"
    )]
    pub struct Args {
        /// Raw display list (little-endian 32-bit command words).
        #[arg(long)]
        input: PathBuf,

        /// Guest address the list is loaded at and started from.
        #[arg(long, default_value_t = DEFAULT_LOAD_ADDR, value_parser = parse_u32)]
        load_addr: u32,

        /// Stream the list in chunks of N words, advancing the stall address after each chunk.
        ///
        /// Without it the whole list is loaded up front and the stall address is its end.
        #[arg(long)]
        chunk_words: Option<usize>,

        /// JSON config file (`list_count`, `sync_timeout_ms`, `external_backend`).
        ///
        /// Without it the `PSPGE_*` environment variables are used.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overrides the configured stall wait in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Callback id reported with signal/finish callbacks.
        #[arg(long, default_value_t = 0)]
        cbid: i32,
    }

    pub fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();

        let args = Args::parse();

        let mut config = load_config(args.config.as_deref())?;
        if let Some(timeout_ms) = args.timeout_ms {
            config.sync_timeout_ms = timeout_ms;
        }

        let bytes = std::fs::read(&args.input)
            .with_context(|| format!("failed to read {}", args.input.display()))?;
        let words = words_from_bytes(&bytes)?;

        let report = replay(
            &words,
            &config,
            &ReplayOptions {
                load_addr: args.load_addr,
                chunk_words: args.chunk_words,
                cbid: args.cbid,
            },
        )?;

        for outcome in &report.outcomes {
            println!("outcome: {outcome:?}");
        }
        for callback in &report.callbacks {
            println!("{callback}");
        }
        for event in &report.events {
            println!("event: {event}");
        }
        for (op, count) in &report.commands {
            println!("op 0x{op:02x}: {count}");
        }
        println!(
            "forwarded {} commands; status {}",
            report.forwarded_commands(),
            report.status
        );
        println!("{}", report.final_state);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
