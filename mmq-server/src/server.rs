use std::{
    io::{ErrorKind, Read},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::{
    Gpio, ScanChain,
    dispatch::{DEFAULT_STATUS_POLL_TIMEOUT, Dispatcher, Outcome},
    error::DispatchError,
    session::Session,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub read_write_timeout: Duration,
    /// Upper bound for the configuration-clear poll when a bitstream load starts.
    pub status_poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_write_timeout: Duration::from_secs(30),
            status_poll_timeout: DEFAULT_STATUS_POLL_TIMEOUT,
        }
    }
}

/// Frame loop serving one host connection at a time.
#[derive(Debug)]
pub struct Server<T, G> {
    dispatcher: Dispatcher<T, G>,
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use mmq_server::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .rw_timeout(Duration::from_secs(20))
///     .status_poll_timeout(Duration::from_millis(500))
///     .build(chain, gpio);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Set how long a bitstream load waits for the device to clear its configuration
    pub fn status_poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.status_poll_timeout = timeout;
        self
    }

    /// Build and return the server
    pub fn build<T: ScanChain, G: Gpio>(self, chain: T, gpio: G) -> Server<T, G> {
        Server::new(chain, gpio, self.config)
    }
}

impl<T: ScanChain, G: Gpio> Server<T, G> {
    pub fn new(chain: T, gpio: G, config: Config) -> Server<T, G> {
        let dispatcher =
            Dispatcher::new(chain, gpio).with_status_poll_timeout(config.status_poll_timeout);
        Server { dispatcher, config }
    }

    pub fn dispatcher(&self) -> &Dispatcher<T, G> {
        &self.dispatcher
    }

    pub fn listen(&mut self, addr: impl ToSocketAddrs) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr)?;
        self.serve(listener)
    }

    /// Serves connections from an already bound listener.
    pub fn serve(&mut self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        log::info!("Server listening for connections on {}", listener.local_addr()?);

        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    let peer_addr = tcp.peer_addr().ok();
                    if let Some(addr) = peer_addr {
                        log::info!("New client connection from {}", addr);
                    }
                    if let Err(e) = self.handle_client(tcp) {
                        log::error!("Client error: {}", e);
                    }
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
        Ok(())
    }

    fn handle_client(&mut self, mut tcp: TcpStream) -> Result<(), DispatchError> {
        tcp.set_read_timeout(Some(self.config.read_write_timeout))
            .map_err(DispatchError::Sink)?;
        tcp.set_write_timeout(Some(self.config.read_write_timeout))
            .map_err(DispatchError::Sink)?;
        tcp.set_nodelay(true).map_err(DispatchError::Sink)?;

        let mut session = Session::new();
        let result = self.read_frames(&mut tcp, &mut session);
        if session.loader().in_progress() {
            log::warn!(
                "Connection closed during bitstream transfer ({:?})",
                session.loader()
            );
            self.dispatcher.abandon(&mut session);
        }
        result
    }

    fn read_frames(&mut self, tcp: &mut TcpStream, session: &mut Session) -> Result<(), DispatchError> {
        let mut buf = [0u8; 512];
        loop {
            let received = match tcp.read(&mut buf) {
                Ok(0) => return Ok(()), // Client disconnected
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::TimedOut || err.kind() == ErrorKind::WouldBlock => {
                    log::error!("Client read timeout, closing connection");
                    return Ok(());
                }
                Err(err)
                    if err.kind() == ErrorKind::ConnectionAborted
                        || err.kind() == ErrorKind::ConnectionReset =>
                {
                    return Ok(());
                }
                Err(err) => return Err(DispatchError::Sink(err)),
            };
            for &byte in &buf[..received] {
                self.process_byte(session, byte, tcp)?;
            }
        }
    }

    /// Feed a byte to the dispatcher and rewind the session as the outcome requires.
    fn process_byte(
        &mut self,
        session: &mut Session,
        byte: u8,
        tcp: &mut TcpStream,
    ) -> Result<(), DispatchError> {
        match self.dispatcher.on_byte(session, byte, tcp) {
            Ok(Outcome::Consumed) => session.finish_frame(),
            Ok(Outcome::NeedMore) => {}
            Err(DispatchError::Sink(err)) => return Err(DispatchError::Sink(err)),
            Err(e) => {
                log::warn!("Dropping frame {:02x?}: {}", session.frame(), e);
                self.dispatcher.abandon(session);
            }
        }
        Ok(())
    }
}
