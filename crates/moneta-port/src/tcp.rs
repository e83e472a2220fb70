//! TCP implementation of [`DevicePort`] for network-attached devices.
//!
//! Line parameters have no meaning here; `set_parameters` is accepted and
//! ignored so baud-rate changes during firmware updates stay transparent.

use crate::{DevicePort, PortParameters};
use moneta_core::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpDevicePort {
    address: SocketAddr,
    stream: Option<TcpStream>,
}

impl TcpDevicePort {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            stream: None,
        }
    }
}

impl DevicePort for TcpDevicePort {
    fn open(&mut self) -> Result<()> {
        let stream = TcpStream::connect_timeout(&self.address, CONNECT_TIMEOUT)
            .map_err(|e| Error::port(format!("{}: {e}", self.address)))?;
        stream.set_nodelay(true)?;
        debug!(address = %self.address, "tcp port connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::PortClosed)?;
        stream.write_all(data)?;
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(Error::PortClosed)?;
        stream.set_read_timeout(Some(timeout))?;

        let mut answer = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    answer.extend_from_slice(&chunk[..n]);
                    // Further bytes may trickle in; one short follow-up read.
                    stream.set_read_timeout(Some(Duration::from_millis(10)))?;
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(answer)
    }

    fn set_parameters(&mut self, _parameters: &PortParameters) -> Result<()> {
        Ok(())
    }

    fn parameters(&self) -> PortParameters {
        PortParameters::default()
    }
}
