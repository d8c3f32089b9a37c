//! Serial transport implementation

use super::{MIN_OS_TIMEOUT, Transport};
use crate::config::{LinkConfig, ParitySetting};
use crate::error::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Serial transport for UART communication
pub struct SerialTransport {
    /// `None` once closed
    port: Option<Box<dyn SerialPort>>,
    path: String,
    /// Timeout currently programmed into the port, to skip redundant ioctls
    current_timeout: Duration,
    /// Longest single blocking read
    max_read: Duration,
}

impl SerialTransport {
    /// Open a serial port with the framing options from `config`
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unsupported data bits: {other}"
                )));
            }
        };
        let parity = match config.parity {
            ParitySetting::None => Parity::None,
            ParitySetting::Odd => Parity::Odd,
            ParitySetting::Even => Parity::Even,
        };
        let stop_bits = match config.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unsupported stop bits: {other}"
                )));
            }
        };

        let timeout = config.read_timeout().max(MIN_OS_TIMEOUT);
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| Error::Connection {
                target: config.port.clone(),
                reason: e.to_string(),
            })?;

        log::info!(
            "Opened serial port: {} at {} baud ({}{}{})",
            config.port,
            config.baud_rate,
            config.data_bits,
            match config.parity {
                ParitySetting::None => 'N',
                ParitySetting::Odd => 'O',
                ParitySetting::Even => 'E',
            },
            config.stop_bits
        );

        Ok(SerialTransport {
            port: Some(port),
            path: config.port.clone(),
            current_timeout: timeout,
            max_read: timeout,
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(Error::Closed)
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        let timeout = timeout.min(self.max_read).max(MIN_OS_TIMEOUT);
        let current = self.current_timeout;
        let port = self.port_mut()?;
        if timeout != current {
            port.set_timeout(timeout)?;
        }
        self.current_timeout = timeout;

        let port = self.port_mut()?;
        match port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port_mut()?.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.port_mut()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(port) = self.port.take() {
            drop(port);
            log::info!("Closed serial port: {}", self.path);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
