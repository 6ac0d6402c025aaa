use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::net::Connection;

const CONNECT_SLEEP_TIME_MILLIS: u64 = 10;

impl Connection for TcpStream {
    fn send_all(&mut self, data: &[u8], deadline: Option<Duration>) -> crate::Result<()> {
        self.set_write_timeout(deadline)?;
        self.write_all(data)?;
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8], deadline: Option<Duration>) -> crate::Result<()> {
        self.set_read_timeout(deadline)?;
        self.read_exact(buf)?;
        Ok(())
    }
}

pub fn tcp_connect(host: &str, port: u16, timeout: Duration) -> std::io::Result<TcpStream> {
    let start = Instant::now();
    loop {
        match TcpStream::connect((host, port)) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                if start.elapsed() >= timeout {
                    return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, e));
                }
            }
        }
        sleep(Duration::from_millis(CONNECT_SLEEP_TIME_MILLIS));
    }
}

pub fn tcp_accept(port: u16) -> std::io::Result<TcpStream> {
    let listener = TcpListener::bind(("localhost", port))?;
    let (stream, _) = listener.accept()?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
