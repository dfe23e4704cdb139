use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::{Result, SerialError};

/// Baud rates the transport accepts.
pub const SUPPORTED_BAUDS: &[u32] = &[9600, 19_200, 38_400, 57_600, 115_200, 230_400];

fn speed_for(baud: u32) -> Option<libc::speed_t> {
    match baud {
        9600 => Some(libc::B9600),
        19_200 => Some(libc::B19200),
        38_400 => Some(libc::B38400),
        57_600 => Some(libc::B57600),
        115_200 => Some(libc::B115200),
        230_400 => Some(libc::B230400),
        _ => None,
    }
}

/// Open `path` and configure it raw: 8 data bits, no parity, one stop
/// bit, no flow control, no line discipline.
pub fn open_raw(path: &Path, baud: u32) -> Result<File> {
    let speed = speed_for(baud).ok_or(SerialError::UnsupportedBaud { baud })?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(path)
        .map_err(|source| SerialError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    configure(&file, speed).map_err(SerialError::Configure)?;
    Ok(file)
}

fn configure(file: &File, speed: libc::speed_t) -> io::Result<()> {
    let fd = file.as_raw_fd();

    // O_NONBLOCK was only for the open; the receive thread relies on
    // the VTIME poll below instead of EAGAIN spinning.
    // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: termios is plain old data; an all-zero value is a valid
    // starting point and is overwritten by tcgetattr.
    let mut tty: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: fd is valid and `tty` is writable for the full struct.
    if unsafe { libc::tcgetattr(fd, &mut tty) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `tty` holds the attributes just read from the device.
    unsafe { libc::cfmakeraw(&mut tty) };

    // 8N1, no hardware flow control, receiver enabled, modem status
    // lines ignored.
    tty.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
    tty.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;

    // VMIN=0/VTIME=1: reads return within 100 ms even on a silent
    // line, which bounds how long the receive thread can miss the
    // stop flag.
    tty.c_cc[libc::VMIN] = 0;
    tty.c_cc[libc::VTIME] = 1;

    // SAFETY: `tty` is a valid termios value.
    unsafe {
        libc::cfsetispeed(&mut tty, speed);
        libc::cfsetospeed(&mut tty, speed);
    }

    // SAFETY: fd is valid and `tty` is fully initialized.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tty) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // Drop any bytes queued from before the configuration took effect.
    // SAFETY: fd is valid.
    if unsafe { libc::tcflush(fd, libc::TCIOFLUSH) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
