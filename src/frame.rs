//! Representacion tipada de las tramas del protocolo Redis (RESP) asi
//! como utilidades para verificarlas y parsearlas desde un buffer de bytes.

use bytes::{Buf, Bytes};
use std::convert::TryInto;
use std::fmt;
use std::io::Cursor;
use std::num::TryFromIntError;
use std::string::FromUtf8Error;

/// Un frame en el protocolo Redis
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(u64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

#[derive(Debug)]
pub enum Error {
    /// No hay suficientes datos en el buffer para parsear un frame completo
    Incomplete,

    /// Codificacion invalida del frame
    Other(crate::Error),
}

impl Frame {
    /// Retorna un `Frame::Array` vacio.
    ///
    /// Los comandos se envian siempre como un array de bulks, asi que
    /// cada comando parte de aqui y va incorporando sus argumentos con
    /// `push_bulk`.
    pub(crate) fn array() -> Frame {
        Frame::Array(vec![])
    }

    /// Incorpora un "bulk" al array.
    ///
    /// # Panics
    /// Se emitira un panic si `self` no es un array.
    pub(crate) fn push_bulk(&mut self, bytes: Bytes) {
        match self {
            Frame::Array(vec) => {
                vec.push(Frame::Bulk(bytes));
            }
            _ => panic!("not an array frame"),
        }
    }

    /// Verifica si en `src` hay un frame completo.
    ///
    /// No se construye nada; solo se avanza el cursor hasta el final del
    /// frame para que el llamante conozca su longitud.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
        match get_u8(src)? {
            b'+' | b'-' => {
                get_line(src)?;
                Ok(())
            }
            b':' => {
                let _ = get_decimal(src)?;
                Ok(())
            }
            b'$' => {
                if b'-' == peek_u8(src)? {
                    // Bulk nulo -> '-1\r\n'
                    skip(src, 4)
                } else {
                    let len: usize = get_decimal(src)?.try_into()?;

                    // Datos + '\r\n'
                    skip(src, len + 2)
                }
            }
            b'*' => {
                if b'-' == peek_u8(src)? {
                    // Array nulo -> '-1\r\n'
                    return skip(src, 4);
                }

                let len = get_decimal(src)?;

                for _ in 0..len {
                    Frame::check(src)?;
                }

                Ok(())
            }
            actual => Err(format!("protocol error; invalid frame type byte `{}`", actual).into()),
        }
    }

    /// Parsea un frame que ya ha sido validado con `check`.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
        match get_u8(src)? {
            b'+' => {
                let line = get_line(src)?.to_vec();
                let string = String::from_utf8(line)?;

                Ok(Frame::Simple(string))
            }
            b'-' => {
                let line = get_line(src)?.to_vec();
                let string = String::from_utf8(line)?;

                Ok(Frame::Error(string))
            }
            b':' => {
                let value = get_decimal(src)?;
                Ok(Frame::Integer(value))
            }
            b'$' => {
                if b'-' == peek_u8(src)? {
                    let line = get_line(src)?;

                    if line != b"-1" {
                        return Err("protocol error; invalid frame format".into());
                    }

                    Ok(Frame::Null)
                } else {
                    let len = get_decimal(src)?.try_into()?;
                    let n = len + 2;

                    if src.remaining() < n {
                        return Err(Error::Incomplete);
                    }

                    let data = Bytes::copy_from_slice(&src.chunk()[..len]);

                    skip(src, n)?;

                    Ok(Frame::Bulk(data))
                }
            }
            b'*' => {
                if b'-' == peek_u8(src)? {
                    let line = get_line(src)?;

                    if line != b"-1" {
                        return Err("protocol error; invalid frame format".into());
                    }

                    return Ok(Frame::Null);
                }

                let len = get_decimal(src)?.try_into()?;
                let mut out = Vec::with_capacity(len);

                for _ in 0..len {
                    out.push(Frame::parse(src)?);
                }

                Ok(Frame::Array(out))
            }
            actual => Err(format!("protocol error; invalid frame type byte `{}`", actual).into()),
        }
    }

    /// Convierte el frame en un error de "frame inesperado"
    pub(crate) fn to_error(&self) -> crate::Error {
        format!("unexpected frame: {}", self).into()
    }
}

impl PartialEq<&str> for Frame {
    fn eq(&self, other: &&str) -> bool {
        match self {
            Frame::Simple(s) => s.eq(other),
            Frame::Bulk(s) => s.eq(other),
            _ => false,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use std::str;

        match self {
            Frame::Simple(response) => response.fmt(fmt),
            Frame::Error(msg) => write!(fmt, "error: {}", msg),
            Frame::Integer(num) => num.fmt(fmt),
            Frame::Bulk(msg) => match str::from_utf8(msg) {
                Ok(string) => string.fmt(fmt),
                Err(_) => write!(fmt, "{:?}", msg),
            },
            Frame::Null => "(nil)".fmt(fmt),
            Frame::Array(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(fmt, " ")?;
                    }
                    part.fmt(fmt)?;
                }

                Ok(())
            }
        }
    }
}

/// Retorna el siguiente byte sin avanzar la posicion del cursor.
fn peek_u8(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }

    Ok(src.chunk()[0])
}

/// Retorna el siguiente byte y avanza una posicion.
fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }

    Ok(src.get_u8())
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), Error> {
    if src.remaining() < n {
        return Err(Error::Incomplete);
    }

    src.advance(n);
    Ok(())
}

/// Lee un entero (sin signo) codificado en texto en la siguiente linea.
fn get_decimal(src: &mut Cursor<&[u8]>) -> Result<u64, Error> {
    use atoi::atoi;

    let line = get_line(src)?;

    atoi::<u64>(line).ok_or_else(|| "protocol error; invalid frame format".into())
}

/// Retorna la siguiente linea terminada en '\r\n' (sin el terminador) y
/// deja el cursor justo despues del '\n'.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let inner = src.get_ref();

    // Se busca hasta el penultimo byte, el '\n' tiene que caber detras.
    let end = inner.len().saturating_sub(1);

    for i in start..end {
        if inner[i] == b'\r' && inner[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);

            return Ok(&src.get_ref()[start..i]);
        }
    }

    Err(Error::Incomplete)
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Other(src.into())
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        "protocol error; invalid frame format".into()
    }
}

impl From<TryFromIntError> for Error {
    fn from(_src: TryFromIntError) -> Error {
        "protocol error; invalid frame format".into()
    }
}

// Permite retornar `frame::Error` como `crate::Error`.
impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Incomplete => "stream ended early".fmt(fmt),
            Error::Other(err) => err.fmt(fmt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Result<Frame, Error> {
        let mut cursor = Cursor::new(input);
        Frame::check(&mut cursor)?;
        let len = cursor.position() as usize;
        assert_eq!(len, input.len());

        cursor.set_position(0);
        Frame::parse(&mut cursor)
    }

    #[test]
    fn parses_set_nx_replies() {
        assert_eq!(parse_all(b"+OK\r\n").unwrap(), Frame::Simple("OK".into()));
        assert_eq!(parse_all(b"$-1\r\n").unwrap(), Frame::Null);
    }

    #[test]
    fn parses_integer_and_error() {
        assert_eq!(parse_all(b":1\r\n").unwrap(), Frame::Integer(1));

        match parse_all(b"-ERR wrong number of arguments\r\n").unwrap() {
            Frame::Error(msg) => assert_eq!(msg, "ERR wrong number of arguments"),
            frame => panic!("unexpected frame {:?}", frame),
        }
    }

    #[test]
    fn parses_push_message() {
        let frame = parse_all(b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n").unwrap();

        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(b"message")),
                Frame::Bulk(Bytes::from_static(b"news")),
                Frame::Bulk(Bytes::from_static(b"hello")),
            ])
        );
    }

    #[test]
    fn partial_input_is_incomplete() {
        let mut cursor = Cursor::new(&b"$5\r\nhel"[..]);
        assert!(matches!(Frame::check(&mut cursor), Err(Error::Incomplete)));

        let mut cursor = Cursor::new(&b"+OK"[..]);
        assert!(matches!(Frame::check(&mut cursor), Err(Error::Incomplete)));

        let mut cursor = Cursor::new(&b""[..]);
        assert!(matches!(Frame::check(&mut cursor), Err(Error::Incomplete)));
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        let mut cursor = Cursor::new(&b"?what\r\n"[..]);
        assert!(matches!(Frame::check(&mut cursor), Err(Error::Other(_))));
    }

    #[test]
    fn display_joins_array_parts() {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"set"));
        frame.push_bulk(Bytes::from_static(b"job:42"));
        frame.push_bulk(Bytes::from_static(b"3000"));

        assert_eq!(frame.to_string(), "set job:42 3000");
    }
}
