//! Serial implementation of [`DevicePort`] over the `serialport` crate.

use crate::{DataBits, DevicePort, FlowControl, Parity, PortParameters, StopBits};
use moneta_core::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::debug;

pub struct SerialDevicePort {
    path: String,
    parameters: PortParameters,
    handle: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialDevicePort {
    pub fn new(path: impl Into<String>, parameters: PortParameters) -> Self {
        Self {
            path: path.into(),
            parameters,
            handle: None,
        }
    }

    fn builder(&self) -> serialport::SerialPortBuilder {
        serialport::new(self.path.clone(), self.parameters.baud_rate)
            .parity(match self.parameters.parity {
                Parity::None => serialport::Parity::None,
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
            })
            .data_bits(match self.parameters.data_bits {
                DataBits::Seven => serialport::DataBits::Seven,
                DataBits::Eight => serialport::DataBits::Eight,
            })
            .stop_bits(match self.parameters.stop_bits {
                StopBits::One => serialport::StopBits::One,
                StopBits::Two => serialport::StopBits::Two,
            })
            .flow_control(match self.parameters.flow_control {
                FlowControl::None => serialport::FlowControl::None,
                FlowControl::Hardware => serialport::FlowControl::Hardware,
            })
    }
}

impl DevicePort for SerialDevicePort {
    fn open(&mut self) -> Result<()> {
        let handle = self
            .builder()
            .open()
            .map_err(|e| Error::port(format!("{}: {e}", self.path)))?;
        debug!(path = %self.path, baud = self.parameters.baud_rate, "serial port opened");
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.handle = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let handle = self.handle.as_mut().ok_or(Error::PortClosed)?;
        handle.write_all(data)?;
        handle.flush()?;
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let handle = self.handle.as_mut().ok_or(Error::PortClosed)?;
        handle
            .set_timeout(timeout)
            .map_err(|e| Error::port(e.to_string()))?;

        let mut answer = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            match handle.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    answer.extend_from_slice(&chunk[..n]);
                    // Drain whatever already arrived without waiting again.
                    if handle.bytes_to_read().map_err(|e| Error::port(e.to_string()))? == 0 {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(answer)
    }

    fn set_parameters(&mut self, parameters: &PortParameters) -> Result<()> {
        self.parameters = *parameters;
        if let Some(handle) = self.handle.as_mut() {
            handle
                .set_baud_rate(parameters.baud_rate)
                .map_err(|e| Error::port(e.to_string()))?;
        }
        Ok(())
    }

    fn parameters(&self) -> PortParameters {
        self.parameters
    }
}
