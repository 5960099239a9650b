//! APDU transports.
//!
//! Every exchange is split in two phases so that a caller can drive the
//! device UI between sending a command and reading its response:
//! [`Exchange::begin_exchange`] sends the command and returns a
//! [`PendingExchange`] handle, [`Exchange::complete_exchange`] consumes the
//! handle and reads the response.

use crate::apdu::{ApduAnswer, ApduCommand};
use crate::error::{Result, SigningError};
use log::{debug, trace, warn};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// An exchange whose command was sent and whose response was not read yet.
#[must_use = "a pending exchange must be completed to read the device response"]
#[derive(Debug)]
pub struct PendingExchange {
    command: ApduCommand,
}

impl PendingExchange {
    pub fn new(command: ApduCommand) -> Self {
        Self { command }
    }

    pub fn ins(&self) -> u8 {
        self.command.ins
    }
}

pub trait Exchange {
    /// Send `command` without waiting for the response.
    fn begin_exchange(&mut self, command: &ApduCommand) -> Result<PendingExchange>;

    /// Wait for and return the response to a previously begun exchange.
    fn complete_exchange(&mut self, pending: PendingExchange) -> Result<ApduAnswer>;

    /// Release a begun exchange whose response is no longer wanted.
    fn abandon_exchange(&mut self, pending: PendingExchange) {
        if let Err(e) = self.complete_exchange(pending) {
            debug!("Discarding abandoned exchange: {}", e);
        }
    }

    /// Synchronous exchange.
    fn exchange(&mut self, command: &ApduCommand) -> Result<ApduAnswer> {
        let pending = self.begin_exchange(command)?;
        self.complete_exchange(pending)
    }
}

impl<T: Exchange + ?Sized> Exchange for &mut T {
    fn begin_exchange(&mut self, command: &ApduCommand) -> Result<PendingExchange> {
        (**self).begin_exchange(command)
    }

    fn complete_exchange(&mut self, pending: PendingExchange) -> Result<ApduAnswer> {
        (**self).complete_exchange(pending)
    }

    fn abandon_exchange(&mut self, pending: PendingExchange) {
        (**self).abandon_exchange(pending)
    }
}

impl<T: Exchange + ?Sized> Exchange for Box<T> {
    fn begin_exchange(&mut self, command: &ApduCommand) -> Result<PendingExchange> {
        (**self).begin_exchange(command)
    }

    fn complete_exchange(&mut self, pending: PendingExchange) -> Result<ApduAnswer> {
        (**self).complete_exchange(pending)
    }

    fn abandon_exchange(&mut self, pending: PendingExchange) {
        (**self).abandon_exchange(pending)
    }
}

/// TCP transport for the emulator APDU socket.
///
/// Requests are framed as `u32 BE length || apdu`, responses as
/// `u32 BE length || data || status word` where the length excludes the
/// status word.
///
/// A response that could not be read in full leaves the stream out of sync
/// with the device; every later exchange fails with
/// [`SigningError::TransportOutOfSync`] until the transport is reconnected.
pub struct TcpTransport {
    stream: TcpStream,
    pending: bool,
    out_of_sync: bool,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs, timeout: Option<Duration>) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(timeout)?;
        stream.set_nodelay(true)?;

        debug!("Connected APDU transport to {}", stream.peer_addr()?);

        Ok(Self {
            stream,
            pending: false,
            out_of_sync: false,
        })
    }

    /// Read one `length || data || status word` frame.
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len)?;
        let len = u32::from_be_bytes(len) as usize;

        let mut raw = vec![0u8; len + 2];
        self.stream.read_exact(&mut raw)?;
        Ok(raw)
    }
}

impl Exchange for TcpTransport {
    fn begin_exchange(&mut self, command: &ApduCommand) -> Result<PendingExchange> {
        if self.out_of_sync {
            return Err(SigningError::TransportOutOfSync);
        }
        if self.pending {
            return Err(SigningError::ExchangeInProgress);
        }

        let raw = command.serialize()?;
        trace!("=> {}", hex::encode(&raw));

        let mut frame = Vec::with_capacity(4 + raw.len());
        frame.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        frame.extend_from_slice(&raw);

        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        self.pending = true;

        Ok(PendingExchange::new(command.clone()))
    }

    fn complete_exchange(&mut self, pending: PendingExchange) -> Result<ApduAnswer> {
        if self.out_of_sync {
            return Err(SigningError::TransportOutOfSync);
        }
        if !self.pending {
            return Err(SigningError::NoPendingExchange);
        }

        let raw = match self.read_frame() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("No response to INS {:#04x}: {}", pending.ins(), e);
                self.out_of_sync = true;
                return Err(e);
            }
        };
        self.pending = false;
        trace!("<= {}", hex::encode(&raw));

        let answer = ApduAnswer::from_answer(raw)?;
        debug!(
            "INS {:#04x} completed with status {:#06x}",
            pending.ins(),
            answer.status()
        );

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::{ins, p1};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();

            let mut len = [0u8; 4];
            socket.read_exact(&mut len).unwrap();
            let mut apdu = vec![0u8; u32::from_be_bytes(len) as usize];
            socket.read_exact(&mut apdu).unwrap();

            // echo the payload back with a success status
            let data = apdu[5..].to_vec();
            let mut response = (data.len() as u32).to_be_bytes().to_vec();
            response.extend_from_slice(&data);
            response.extend_from_slice(&[0x90, 0x00]);
            socket.write_all(&response).unwrap();

            apdu
        });

        let mut transport = TcpTransport::connect(addr, Some(Duration::from_secs(5))).unwrap();
        let command = ApduCommand::new(ins::CLEAR_SIGN, p1::SIGN, 0x00, vec![1, 2, 3]);

        let pending = transport.begin_exchange(&command).unwrap();
        assert!(matches!(
            transport.begin_exchange(&command),
            Err(SigningError::ExchangeInProgress)
        ));

        let answer = transport.complete_exchange(pending).unwrap();
        assert!(answer.is_success());
        assert_eq!(&[1u8, 2, 3], answer.data());

        let sent = server.join().unwrap();
        assert_eq!(vec![0xE0, 0xC4, 0x10, 0x00, 0x03, 1, 2, 3], sent);
    }

    /// Answer each request with the next `(delay, data)` pair, success status.
    fn serve(listener: TcpListener, answers: Vec<(Duration, Vec<u8>)>) -> Vec<Vec<u8>> {
        let (mut socket, _) = listener.accept().unwrap();
        let mut requests = Vec::new();

        for (delay, data) in answers {
            let mut len = [0u8; 4];
            socket.read_exact(&mut len).unwrap();
            let mut apdu = vec![0u8; u32::from_be_bytes(len) as usize];
            socket.read_exact(&mut apdu).unwrap();
            requests.push(apdu);

            thread::sleep(delay);
            let mut response = (data.len() as u32).to_be_bytes().to_vec();
            response.extend_from_slice(&data);
            response.extend_from_slice(&[0x90, 0x00]);
            // the client may be gone already
            let _ = socket.write_all(&response);
        }
        requests
    }

    #[test]
    fn test_late_answer_after_abandon() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            serve(listener, vec![(Duration::from_millis(400), vec![0xaa])])
        });

        let mut transport = TcpTransport::connect(addr, Some(Duration::from_millis(100))).unwrap();
        let sign = ApduCommand::new(ins::CLEAR_SIGN, p1::SIGN, 0x00, vec![1, 2, 3]);
        let pending = transport.begin_exchange(&sign).unwrap();
        transport.abandon_exchange(pending);

        let config = ApduCommand::new(ins::GET_APP_CONFIGURATION, 0x00, 0x00, vec![]);
        assert!(matches!(
            transport.exchange(&config),
            Err(SigningError::TransportOutOfSync)
        ));
        // still rejected once the late answer has arrived
        thread::sleep(Duration::from_millis(500));
        assert!(matches!(
            transport.exchange(&config),
            Err(SigningError::TransportOutOfSync)
        ));

        let requests = server.join().unwrap();
        assert_eq!(1, requests.len());
        assert_eq!(ins::CLEAR_SIGN, requests[0][1]);
    }

    #[test]
    fn test_abandon_then_next_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            serve(
                listener,
                vec![
                    (Duration::ZERO, vec![0xaa]),
                    (Duration::ZERO, vec![0x00, 0x01, 0x02, 0x03]),
                ],
            )
        });

        let mut transport = TcpTransport::connect(addr, Some(Duration::from_secs(5))).unwrap();
        let sign = ApduCommand::new(ins::CLEAR_SIGN, p1::SIGN, 0x00, vec![1, 2, 3]);
        let pending = transport.begin_exchange(&sign).unwrap();
        transport.abandon_exchange(pending);

        let config = ApduCommand::new(ins::GET_APP_CONFIGURATION, 0x00, 0x00, vec![]);
        let answer = transport.exchange(&config).unwrap();
        assert_eq!(&[0x00u8, 0x01, 0x02, 0x03], answer.data());

        let requests = server.join().unwrap();
        let codes: Vec<u8> = requests.iter().map(|r| r[1]).collect();
        assert_eq!(vec![ins::CLEAR_SIGN, ins::GET_APP_CONFIGURATION], codes);
    }
}
