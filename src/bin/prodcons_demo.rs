use colored::Colorize;
use prodcons::{logger, BoundedChannel, Interrupt, Limits, Result, Role};
use std::thread;
use tracing::Level;

// =============================================================================
// One producer, one consumer over a bounded channel
// =============================================================================

const LINES: [&str; 4] = [
    "the quick brown fox\n",
    "jumps over\n",
    "the lazy dog\n",
    "and the channel is only sixty-four bytes wide\n",
];

fn main() -> Result<()> {
    if let Err(err) = logger::init(Level::INFO) {
        eprintln!("{} {err}", "logging disabled:".yellow());
    }
    println!("{}", "Bounded channel demo".bold());

    let channel = BoundedChannel::new(&Limits::default())?;
    println!("capacity: {} bytes", channel.capacity());

    let producer = {
        let channel = channel.clone();
        thread::spawn(move || -> Result<usize> {
            let session = channel.open(Role::Producer, &Interrupt::new())?;
            let mut sent = 0;
            for line in LINES {
                sent += session.write(line.as_bytes())?;
            }
            Ok(sent)
        })
    };

    let consumer = {
        let channel = channel.clone();
        thread::spawn(move || -> Result<Vec<u8>> {
            let session = channel.open(Role::Consumer, &Interrupt::new())?;
            let mut received = Vec::new();
            loop {
                let chunk = session.read(16)?;
                if chunk.is_empty() {
                    break;
                }
                received.extend_from_slice(&chunk);
            }
            Ok(received)
        })
    };

    match producer.join() {
        Ok(result) => println!("{} {} bytes", "sent".green(), result?),
        Err(_) => eprintln!("{}", "producer thread panicked".red()),
    }
    match consumer.join() {
        Ok(result) => {
            let received = result?;
            println!("{} {} bytes:", "received".green(), received.len());
            print!("{}", String::from_utf8_lossy(&received));
        }
        Err(_) => eprintln!("{}", "consumer thread panicked".red()),
    }
    Ok(())
}
