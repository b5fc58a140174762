//! OS-multiplexer abstraction. Kept behind a trait so the worker loop
//! doesn't depend on `mio` directly; `MioDriver` is the only
//! implementation, using a single readiness model rather than a dedicated
//! IOCP backend.

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::sync::Arc;
use std::time::Duration;

pub const SOCKET_TOKEN: Token = Token(0);
pub const WAKE_TOKEN: Token = Token(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    Readable,
    Writable,
    Woken,
}

pub trait EventDriver {
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<DriverEvent>>;
    /// A handle other threads can call to interrupt a blocked `wait`.
    fn waker(&self) -> Arc<dyn Fn() -> io::Result<()> + Send + Sync>;
}

pub struct MioDriver {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl MioDriver {
    pub fn new(socket: &mut UdpSocket) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(socket, SOCKET_TOKEN, Interest::READABLE | Interest::WRITABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(MioDriver {
            poll,
            events: Events::with_capacity(1024),
            waker,
        })
    }
}

impl EventDriver for MioDriver {
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<DriverEvent>> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut out = Vec::new();
        for ev in self.events.iter() {
            if ev.token() == WAKE_TOKEN {
                out.push(DriverEvent::Woken);
                continue;
            }
            if ev.is_readable() {
                out.push(DriverEvent::Readable);
            }
            if ev.is_writable() {
                out.push(DriverEvent::Writable);
            }
        }
        Ok(out)
    }

    fn waker(&self) -> Arc<dyn Fn() -> io::Result<()> + Send + Sync> {
        let waker = Arc::clone(&self.waker);
        Arc::new(move || waker.wake())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_surfaces_wake_event_from_another_thread() {
        let mut socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut driver = MioDriver::new(&mut socket).unwrap();
        let wake = driver.waker();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            wake().unwrap();
        });
        let events = driver.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(events.contains(&DriverEvent::Woken));
        handle.join().unwrap();
    }
}
