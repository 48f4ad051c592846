use futures::io::{ReadHalf, WriteHalf};
use futures::lock::Mutex;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::io;

pub(crate) struct Transport<T> {
    reader: Mutex<Option<ReadHalf<T>>>,
    writer: Mutex<Option<WriteHalf<T>>>,
}

fn released() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport released")
}

impl<T: AsyncRead + AsyncWrite + Unpin> Transport<T> {
    pub fn new(stream: T) -> Self {
        let (reader, writer) = stream.split();
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }
    }

    pub async fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.reader.lock().await.as_mut() {
            Some(reader) => reader.read(buffer).await,
            None => Err(released()),
        }
    }

    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        match self.writer.lock().await.as_mut() {
            Some(writer) => writer.write_all(data).await,
            None => Err(released()),
        }
    }

    pub async fn flush(&self) -> io::Result<()> {
        match self.writer.lock().await.as_mut() {
            Some(writer) => writer.flush().await,
            None => Err(released()),
        }
    }

    /// Closes the write direction once both close frames have been exchanged.
    pub async fn close(&self) -> io::Result<()> {
        match self.writer.lock().await.as_mut() {
            Some(writer) => writer.close().await,
            None => Ok(()),
        }
    }

    /// Drops whichever halves are not in use right now.
    pub fn release(&self) {
        if let Some(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        if let Some(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }
}
