#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use foundation_mockserver::MockServer;

macro_rules! t {
    ($e:expr) => {
        match $e {
            Ok(t) => t,
            Err(e) => panic!("received error for `{}`: {}", stringify!($e), e),
        }
    };
}

pub struct RawResponse {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn status(&self) -> u16 {
        self.status_line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status line should carry a code")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Raw client connection that can send several requests over one socket.
pub struct RawClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl RawClient {
    pub fn connect(server: &MockServer) -> Self {
        let stream = t!(TcpStream::connect(t!(server.socket_addr())));
        t!(stream.set_read_timeout(Some(Duration::from_secs(5))));
        let reader = BufReader::new(t!(stream.try_clone()));
        Self {
            writer: stream,
            reader,
        }
    }

    pub fn send(&mut self, raw: &[u8]) {
        t!(self.writer.write_all(raw));
        t!(self.writer.flush());
    }

    /// Reads one identity framed response.
    pub fn read_response(&mut self) -> RawResponse {
        let mut status_line = String::new();
        t!(self.reader.read_line(&mut status_line));
        assert!(!status_line.is_empty(), "connection closed before a response");

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            t!(self.reader.read_line(&mut line));
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').expect("header line");
            headers.push((name.to_string(), value.trim().to_string()));
        }

        let length: usize = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
            .map_or(0, |(_, value)| value.parse().expect("numeric length"));

        let mut body = vec![0u8; length];
        t!(self.reader.read_exact(&mut body));

        RawResponse {
            status_line: status_line.trim_end().to_string(),
            headers,
            body,
        }
    }

    /// Everything the server writes until it closes the connection.
    pub fn read_to_end(&mut self) -> Vec<u8> {
        let mut raw = Vec::new();
        t!(self.reader.read_to_end(&mut raw));
        raw
    }

    /// True when the server closed its side (EOF on read).
    pub fn is_closed_by_server(&mut self) -> bool {
        let mut rest = Vec::new();
        match self.reader.read_to_end(&mut rest) {
            Ok(0) => true,
            Ok(_) => false,
            Err(err) => err.kind() == std::io::ErrorKind::ConnectionReset,
        }
    }
}
