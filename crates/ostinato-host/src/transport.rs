//! Blocking framed transport over a Unix domain socket.
//!
//! Control traffic is low-frequency and serialized under the controller
//! mutex, so a plain blocking stream is the right tool. The one hot-path
//! message (`ProcessBlock`) is encoded into a preallocated scratch buffer;
//! nothing on that path allocates.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::protocol::{
    ControlHeader, ControlMessageType, ProcessBlockRequest, CONTROL_HEADER_BYTES,
};

/// Scratch capacity for the hot-path frame: header plus an encoded
/// [`ProcessBlockRequest`] with room to spare.
const HOT_FRAME_BYTES: usize = 64;

pub struct ControlSocket {
    stream: UnixStream,
    hot_frame: [u8; HOT_FRAME_BYTES],
}

impl ControlSocket {
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .map_err(|e| Error::ConnectionFailed(format!("{}: {e}", path.display())))?;
        Ok(Self {
            stream,
            hot_frame: [0u8; HOT_FRAME_BYTES],
        })
    }

    /// Send a framed message with a bincode payload.
    pub fn send<T: Serialize>(&mut self, message_type: ControlMessageType, payload: &T) -> Result<()> {
        let body = bincode::serialize(payload)?;
        let header = ControlHeader::new(message_type, body.len() as u32);
        self.stream.write_all(&header.to_bytes())?;
        self.stream.write_all(&body)?;
        Ok(())
    }

    /// Send a payload-less message.
    pub fn send_bare(&mut self, message_type: ControlMessageType) -> Result<()> {
        let header = ControlHeader::new(message_type, 0);
        self.stream.write_all(&header.to_bytes())?;
        Ok(())
    }

    /// Hot path: one write syscall, no allocation.
    pub fn send_process_block(&mut self, request: &ProcessBlockRequest) -> Result<()> {
        let mut cursor = std::io::Cursor::new(&mut self.hot_frame[CONTROL_HEADER_BYTES..]);
        bincode::serialize_into(&mut cursor, request)?;
        let body_len = cursor.position() as usize;
        let header = ControlHeader::new(ControlMessageType::ProcessBlock, body_len as u32);
        self.hot_frame[..CONTROL_HEADER_BYTES].copy_from_slice(&header.to_bytes());
        self.stream
            .write_all(&self.hot_frame[..CONTROL_HEADER_BYTES + body_len])?;
        Ok(())
    }

    /// Receive the next frame header.
    pub fn recv_header(&mut self) -> Result<ControlHeader> {
        let mut bytes = [0u8; CONTROL_HEADER_BYTES];
        self.stream.read_exact(&mut bytes)?;
        ControlHeader::from_bytes(&bytes)
    }

    /// Receive a frame and decode its payload as `T`, requiring the given
    /// message type.
    pub fn recv_expect<T: DeserializeOwned>(&mut self, expected: ControlMessageType) -> Result<T> {
        let header = self.recv_header()?;
        if header.message_type != expected as u16 {
            return Err(Error::Protocol(format!(
                "expected message type {:?}, got {}",
                expected, header.message_type
            )));
        }
        let mut body = vec![0u8; header.size as usize];
        self.stream.read_exact(&mut body)?;
        Ok(bincode::deserialize(&body)?)
    }

    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HelloRequest, HelloResponse};
    use std::os::unix::net::UnixListener;

    fn socket_pair(tag: &str) -> (ControlSocket, UnixStream) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("{tag}.sock"));
        let listener = UnixListener::bind(&path).unwrap();
        let client = ControlSocket::connect(&path).unwrap();
        let (server, _) = listener.accept().unwrap();
        // Leak the tempdir so the socket path survives the test body.
        std::mem::forget(dir);
        (client, server)
    }

    fn read_frame(server: &mut UnixStream) -> (ControlHeader, Vec<u8>) {
        let mut header_bytes = [0u8; CONTROL_HEADER_BYTES];
        server.read_exact(&mut header_bytes).unwrap();
        let header = ControlHeader::from_bytes(&header_bytes).unwrap();
        let mut body = vec![0u8; header.size as usize];
        server.read_exact(&mut body).unwrap();
        (header, body)
    }

    #[test]
    fn hello_frame_round_trips() {
        let (mut client, mut server) = socket_pair("hello");
        let hello = HelloRequest {
            block_size: 512,
            num_channels_in: 0,
            num_channels_out: 2,
            num_blocks: 3,
            ring_std_capacity: 1024,
            ring_ctrl_capacity: 128,
            ring_ui_capacity: 128,
            sample_rate: 48_000.0,
        };
        client.send(ControlMessageType::Hello, &hello).unwrap();
        let (header, body) = read_frame(&mut server);
        assert_eq!(header.message_type, ControlMessageType::Hello as u16);
        let decoded: HelloRequest = bincode::deserialize(&body).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn process_block_uses_hot_frame() {
        let (mut client, mut server) = socket_pair("block");
        let request = ProcessBlockRequest {
            block_id: 2,
            engine_sample_start: 1024,
            plugin_sample_start: 0,
            segment_start: 0,
            segment_len: 1,
        };
        client.send_process_block(&request).unwrap();
        let (header, body) = read_frame(&mut server);
        assert_eq!(header.message_type, ControlMessageType::ProcessBlock as u16);
        let decoded: ProcessBlockRequest = bincode::deserialize(&body).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn recv_expect_validates_type() {
        let (mut client, mut server) = socket_pair("expect");
        let response = HelloResponse {
            shm_size_bytes: 65536,
            shm_name: "ostinato_track_0".to_string(),
        };
        let body = bincode::serialize(&response).unwrap();
        let header = ControlHeader::new(ControlMessageType::Hello, body.len() as u32);
        server.write_all(&header.to_bytes()).unwrap();
        server.write_all(&body).unwrap();

        let decoded: HelloResponse = client.recv_expect(ControlMessageType::Hello).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn recv_expect_rejects_wrong_type() {
        let (mut client, mut server) = socket_pair("wrong");
        let header = ControlHeader::new(ControlMessageType::Shutdown, 0);
        server.write_all(&header.to_bytes()).unwrap();
        let result: Result<HelloResponse> = client.recv_expect(ControlMessageType::Hello);
        assert!(result.is_err());
    }
}
