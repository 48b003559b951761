//! POSIX serial transport: `O_RDWR|O_NOCTTY|O_NONBLOCK` open, 8-N-1 raw
//! mode with flow control and echo disabled, and a dedicated reader
//! thread. Uses a short-sleep poll loop rather than `epoll`,
//! since the transport's own contract only promises "non-blocking reads",
//! not a particular readiness mechanism.

use crate::transport::{ReceiveCallback, SerialTransport};
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg};
use octopus_common::prelude::{OctopusError, OctopusResult};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, FromRawFd, IntoRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// How long the receive thread sleeps between non-blocking read attempts
/// when no data is available.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn baud_to_constant(baud: u32) -> OctopusResult<BaudRate> {
    Ok(match baud {
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        _ => {
            return Err(OctopusError::TransportIo(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsupported baud rate: {baud}"),
            )))
        }
    })
}

/// Serial transport over a real POSIX character device (`/dev/ttyS*`,
/// `/dev/ttyUSB*`, ...).
pub struct PosixSerialTransport {
    file: Arc<File>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    callback: Arc<Mutex<Option<ReceiveCallback>>>,
}

impl PosixSerialTransport {
    /// Open `device` at `baud`, configure 8-N-1 raw mode with no flow
    /// control, and start the receive thread.
    pub fn open(device: &str, baud: u32) -> OctopusResult<Self> {
        let baud_rate = baud_to_constant(baud)?;

        let fd = open(
            device,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map_err(|errno| {
            OctopusError::TransportIo(std::io::Error::from_raw_os_error(errno as i32))
        })?;

        // SAFETY: `fd` was just returned by `open` above and is owned here.
        let file = unsafe { File::from_raw_fd(fd.into_raw_fd()) };

        let mut options = termios::tcgetattr(file.as_fd())
            .map_err(|errno| OctopusError::TransportIo(std::io::Error::from_raw_os_error(errno as i32)))?;

        termios::cfsetispeed(&mut options, baud_rate)
            .map_err(|errno| OctopusError::TransportIo(std::io::Error::from_raw_os_error(errno as i32)))?;
        termios::cfsetospeed(&mut options, baud_rate)
            .map_err(|errno| OctopusError::TransportIo(std::io::Error::from_raw_os_error(errno as i32)))?;

        options.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        options.control_flags &= !ControlFlags::PARENB;
        options.control_flags &= !ControlFlags::CSTOPB;
        options.control_flags &= !ControlFlags::CSIZE;
        options.control_flags |= ControlFlags::CS8;

        options.local_flags &=
            !(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG);
        options.input_flags &= !(InputFlags::IXON | InputFlags::IXOFF | InputFlags::IXANY);
        options.output_flags &= !OutputFlags::OPOST;

        termios::tcsetattr(file.as_fd(), SetArg::TCSANOW, &options)
            .map_err(|errno| OctopusError::TransportIo(std::io::Error::from_raw_os_error(errno as i32)))?;

        info!(device, baud, "serial transport opened");

        let file = Arc::new(file);
        let stop = Arc::new(AtomicBool::new(false));
        let callback: Arc<Mutex<Option<ReceiveCallback>>> = Arc::new(Mutex::new(None));

        let reader = spawn_reader(Arc::clone(&file), Arc::clone(&stop), Arc::clone(&callback));

        Ok(Self {
            file,
            stop,
            reader: Some(reader),
            callback,
        })
    }
}

fn spawn_reader(
    file: Arc<File>,
    stop: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<ReceiveCallback>>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 512];
        loop {
            if stop.load(Ordering::Acquire) {
                break;
            }
            let mut f = &*file;
            match f.read(&mut buf) {
                Ok(0) => thread::sleep(POLL_INTERVAL),
                Ok(n) => {
                    if let Some(cb) = callback.lock().as_ref() {
                        cb(&buf[..n]);
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                    // EINTR: retry immediately.
                }
                Err(err) => {
                    error!(%err, "serial receive loop tearing down");
                    break;
                }
            }
        }
    })
}

impl SerialTransport for PosixSerialTransport {
    fn write(&self, bytes: &[u8]) -> OctopusResult<usize> {
        let mut f = &*self.file;
        f.write(bytes).map_err(OctopusError::TransportIo)
    }

    fn set_receive_callback(&mut self, callback: ReceiveCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("serial receive thread panicked during shutdown");
            }
        }
    }
}

impl Drop for PosixSerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
