use crate::frame::{self, Frame};

use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// Envia y recibe valores `Frame` hacia y desde el servidor.
///
/// Los bytes recibidos se acumulan en `buffer` hasta que contienen un
/// frame completo; entonces se parsea y se retorna. Para escribir, el
/// frame se codifica sobre un `BufWriter` y se hace `flush` al final.
#[derive(Debug)]
pub struct Connection {
    /// El `TcpStream` va decorado con un `BufWriter` para no emitir una
    /// llamada al sistema por cada fragmento del frame.
    stream: BufWriter<TcpStream>,

    /// Buffer de lectura.
    buffer: BytesMut,
}

impl Connection {
    /// Crea una nueva `Connection` sobre `socket`.
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            // 4KB son suficientes para las respuestas que maneja el cliente.
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Lee un unico `Frame` del stream.
    ///
    /// Espera hasta tener datos suficientes para un frame completo. Los
    /// datos que sobran en el buffer despues del frame se conservan para
    /// la siguiente llamada.
    ///
    /// # Retorno
    /// `None` si el otro extremo cierra la conexion de forma limpia (sin
    /// dejar un frame a medias). Un cierre a mitad de frame es un error.
    pub async fn read_frame(&mut self) -> crate::Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            // No hay un frame completo, se leen mas datos del socket.
            // `0` indica el final del stream.
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                } else {
                    return Err("connection reset by peer".into());
                }
            }
        }
    }

    /// Intenta parsear un frame del buffer. Si lo consigue, el frame se
    /// retorna y sus bytes se eliminan del buffer.
    fn parse_frame(&mut self) -> crate::Result<Option<Frame>> {
        use frame::Error::Incomplete;

        let mut buf = Cursor::new(&self.buffer[..]);

        match Frame::check(&mut buf) {
            Ok(_) => {
                // `check` deja el cursor al final del frame.
                let len = buf.position() as usize;

                buf.set_position(0);
                let frame = Frame::parse(&mut buf)?;

                self.buffer.advance(len);

                Ok(Some(frame))
            }
            Err(Incomplete) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Escribe un frame en la conexion.
    ///
    /// Solo se soportan arrays de un nivel: los comandos que envia el
    /// cliente nunca anidan arrays.
    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        match frame {
            Frame::Array(val) => {
                self.stream.write_u8(b'*').await?;
                self.write_decimal(val.len() as u64).await?;

                for entry in val {
                    self.write_value(entry).await?;
                }
            }
            _ => self.write_value(frame).await?,
        }

        self.stream.flush().await
    }

    /// Escribe un frame que no es un array.
    async fn write_value(&mut self, frame: &Frame) -> io::Result<()> {
        match frame {
            Frame::Simple(val) => {
                self.stream.write_u8(b'+').await?;
                self.stream.write_all(val.as_bytes()).await?;
                self.stream.write_all(b"\r\n").await?;
            }
            Frame::Error(val) => {
                self.stream.write_u8(b'-').await?;
                self.stream.write_all(val.as_bytes()).await?;
                self.stream.write_all(b"\r\n").await?;
            }
            Frame::Integer(val) => {
                self.stream.write_u8(b':').await?;
                self.write_decimal(*val).await?;
            }
            Frame::Null => {
                self.stream.write_all(b"$-1\r\n").await?;
            }
            Frame::Bulk(val) => {
                let len = val.len();

                self.stream.write_u8(b'$').await?;
                self.write_decimal(len as u64).await?;
                self.stream.write_all(val).await?;
                self.stream.write_all(b"\r\n").await?;
            }
            Frame::Array(_val) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "nested array frames are not supported",
                ))
            }
        }

        Ok(())
    }

    /// Escribe un decimal seguido de '\r\n'.
    async fn write_decimal(&mut self, val: u64) -> io::Result<()> {
        use std::io::Write;

        let mut buf = [0u8; 20];
        let mut buf = Cursor::new(&mut buf[..]);
        write!(&mut buf, "{}", val)?;

        let pos = buf.position() as usize;
        self.stream.write_all(&buf.get_ref()[..pos]).await?;
        self.stream.write_all(b"\r\n").await?;

        Ok(())
    }
}
