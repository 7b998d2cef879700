//! A re-arming timer on its own thread.
//!
//! The callback runs on the timer thread and must not block: heavier work
//! belongs on a [`WorkQueue`](crate::workqueue::WorkQueue).

use crate::error::{Error, Result};
use crossbeam::channel::{bounded, Sender};
use crossbeam::select;
use std::thread;
use std::time::Duration;

pub struct PeriodicTimer {
    stop: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Starts firing `fire` every `period()`.
    ///
    /// `period` is asked again each time the timer re-arms, so a changed
    /// interval applies from the next expiry on.
    pub fn start<P, F>(name: &str, period: P, mut fire: F) -> Result<Self>
    where
        P: Fn() -> Duration + Send + 'static,
        F: FnMut() + Send + 'static,
    {
        let (stop, stopped) = bounded::<()>(0);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut armed = true;
                while armed {
                    // The stop sender never sends: dropping it disconnects.
                    select! {
                        recv(stopped) -> _ => armed = false,
                        default(period()) => fire(),
                    }
                }
            })
            .map_err(|err| Error::spawn(name, err))?;
        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Stops the timer and waits for a fire in progress to return. No fire
    /// starts after this returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("timer callback panicked");
            }
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fires_repeatedly() {
        let fires = Arc::new(AtomicUsize::new(0));
        let timer = {
            let fires = Arc::clone(&fires);
            PeriodicTimer::start("tick", || Duration::from_millis(5), move || {
                fires.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };
        thread::sleep(Duration::from_millis(200));
        timer.stop();
        assert!(fires.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_no_fire_after_stop() {
        let fires = Arc::new(AtomicUsize::new(0));
        let timer = {
            let fires = Arc::clone(&fires);
            PeriodicTimer::start("quiet", || Duration::from_millis(2), move || {
                fires.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };
        thread::sleep(Duration::from_millis(30));
        timer.stop();
        let seen = fires.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(fires.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_stop_before_first_expiry() {
        let fires = Arc::new(AtomicUsize::new(0));
        let timer = {
            let fires = Arc::clone(&fires);
            PeriodicTimer::start("slow", || Duration::from_secs(60), move || {
                fires.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };
        drop(timer);
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }
}
