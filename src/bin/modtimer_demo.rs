use colored::Colorize;
use prodcons::{logger, Interrupt, ModuleConfig, Result, TimerModule, TimerSettings, Variant};
use std::sync::Arc;
use std::thread;
use tracing::Level;

// =============================================================================
// Parity timer module with one reader per queue
// =============================================================================

const VALUES_PER_READER: usize = 8;

fn main() -> Result<()> {
    if let Err(err) = logger::init(Level::INFO) {
        eprintln!("{} {err}", "logging disabled:".yellow());
    }
    println!("{}", "Timer module demo (parity)".bold());

    let config = ModuleConfig {
        variant: Variant::Parity,
        timer: TimerSettings {
            period_ms: 20,
            threshold_percent: 50,
            value_bound: 100,
        },
        ..ModuleConfig::default()
    };
    let module = Arc::new(TimerModule::new(&config)?);
    print!("{}", module.config().render());

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let module = Arc::clone(&module);
            thread::spawn(move || -> Result<(usize, Vec<u32>)> {
                let session = module.open(&Interrupt::new())?;
                let mut values = Vec::with_capacity(VALUES_PER_READER);
                for _ in 0..VALUES_PER_READER {
                    values.push(session.read_value()?);
                }
                Ok((session.queue(), values))
            })
        })
        .collect();

    for reader in readers {
        match reader.join() {
            Ok(result) => {
                let (queue, values) = result?;
                let label = if queue == 0 { "even".cyan() } else { "odd".magenta() };
                println!("{label}: {values:?}");
            }
            Err(_) => eprintln!("{}", "reader thread panicked".red()),
        }
    }

    println!(
        "drains completed: {}, sessions left: {}",
        module.drains_completed(),
        module.active_sessions()
    );
    Ok(())
}
