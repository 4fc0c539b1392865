//! Implementacion de un cliente Redis minimo.
//!
//! Proporciona una conexion asincrona y metodos para los comandos que
//! necesitan el lock, el pool y el repartidor de pub/sub.

use crate::cmd::{Auth, Del, DelIfEq, Expire, Get, Ping, Publish, Set, Subscribe, Unsubscribe};
use crate::{Connection, Frame, Parse};

use async_stream::try_stream;
use bytes::Bytes;
use std::io::{Error, ErrorKind};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_stream::Stream;
use tracing::{debug, instrument};

/// Conexion establecida con un servidor Redis.
///
/// Sobre un unico `TcpStream`, `Client` proporciona las funciones basicas
/// de un cliente (no hay pipelining): se envia un comando y se espera
/// su respuesta antes de enviar el siguiente.
///
/// Las conexiones se establecen con `connect`.
#[derive(Debug)]
pub struct Client {
    /// Conexion TCP decorada con el codificador/decodificador de frames.
    connection: Connection,

    /// `true` si se ha enviado una peticion cuya respuesta no se ha
    /// leido completa. Ocurre cuando el futuro de la peticion se abandona
    /// a mitad (por ejemplo al cancelar una espera) o cuando el servidor
    /// cierra la conexion. Un cliente en este estado no puede reutilizarse.
    dirty: bool,
}

/// Un cliente que ha entrado en modo pub/sub.
///
/// Una vez subscrito a un canal, el cliente solo puede ejecutar comandos
/// relacionados con pub/sub. Por eso `Client` se convierte en un
/// `Subscriber` y no se ofrecen el resto de comandos.
#[derive(Debug)]
pub struct Subscriber {
    /// Cliente subscrito.
    client: Client,

    /// Canales a los que el `Subscriber` esta subscrito.
    subscribed_channels: Vec<String>,
}

/// Mensaje recibido en un canal al que se esta subscrito.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: String,
    pub content: Bytes,
}

impl Client {
    /// Establece una conexion con el servidor Redis ubicado en `addr`.
    ///
    /// `addr` puede ser cualquier tipo que pueda convertirse de forma
    /// asincrona en un `SocketAddr`, incluidos `SocketAddr` y strings.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use setnx_lease::client;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let client = match client::Client::connect("localhost:6379").await {
    ///         Ok(client) => client,
    ///         Err(_) => panic!("failed to establish connection"),
    ///     };
    /// # drop(client);
    /// }
    /// ```
    pub async fn connect<T: ToSocketAddrs>(addr: T) -> crate::Result<Client> {
        let socket = TcpStream::connect(addr).await?;

        let connection = Connection::new(socket);

        Ok(Client {
            connection,
            dirty: false,
        })
    }

    /// Autentica la conexion.
    ///
    /// La password no se incluye en las trazas.
    #[instrument(skip(self, password))]
    pub async fn auth(&mut self, password: &str) -> crate::Result<()> {
        let frame = Auth::new(password).into_frame();

        match self.request(&frame).await? {
            Frame::Simple(response) if response == "OK" => Ok(()),
            frame => Err(frame.to_error()),
        }
    }

    /// Ping al servidor.
    ///
    /// Retorna PONG si no se proporciona argumento, en caso contrario
    /// retorna una copia del argumento.
    #[instrument(skip(self))]
    pub async fn ping(&mut self, msg: Option<String>) -> crate::Result<Bytes> {
        let frame = Ping::new(msg).into_frame();
        debug!(request = ?frame);

        match self.request(&frame).await? {
            Frame::Simple(value) => Ok(value.into()),
            Frame::Bulk(value) => Ok(value),
            frame => Err(frame.to_error()),
        }
    }

    /// Obtiene el valor de una clave.
    ///
    /// Si la clave no existe se retorna `None`.
    #[instrument(skip(self))]
    pub async fn get(&mut self, key: &str) -> crate::Result<Option<Bytes>> {
        let frame = Get::new(key).into_frame();
        debug!(request = ?frame);

        match self.request(&frame).await? {
            Frame::Simple(value) => Ok(Some(value.into())),
            Frame::Bulk(value) => Ok(Some(value)),
            Frame::Null => Ok(None),
            frame => Err(frame.to_error()),
        }
    }

    /// Asigna `value` a la clave `key`, sobreescribiendo cualquier valor
    /// (y expiracion) anterior.
    #[instrument(skip(self))]
    pub async fn set(&mut self, key: &str, value: Bytes) -> crate::Result<()> {
        self.set_cmd(Set::new(key, value, None)).await
    }

    /// Asigna `value` a la clave `key`. La clave expira despues de
    /// `expiration`.
    #[instrument(skip(self))]
    pub async fn set_expires(
        &mut self,
        key: &str,
        value: Bytes,
        expiration: Duration,
    ) -> crate::Result<()> {
        self.set_cmd(Set::new(key, value, Some(expiration))).await
    }

    async fn set_cmd(&mut self, cmd: Set) -> crate::Result<()> {
        let frame = cmd.into_frame();
        debug!(request = ?frame);

        match self.request(&frame).await? {
            Frame::Simple(response) if response == "OK" => Ok(()),
            frame => Err(frame.to_error()),
        }
    }

    /// Asigna `value` a la clave `key` con la expiracion indicada solo si
    /// la clave no existe.
    ///
    /// Retorna `true` si la clave se ha creado y `false` si ya existia.
    #[instrument(skip(self))]
    pub async fn set_nx(
        &mut self,
        key: &str,
        value: Bytes,
        expiration: Duration,
    ) -> crate::Result<bool> {
        let frame = Set::if_absent(key, value, expiration).into_frame();
        debug!(request = ?frame);

        match self.request(&frame).await? {
            Frame::Simple(response) if response == "OK" => Ok(true),
            Frame::Null => Ok(false),
            frame => Err(frame.to_error()),
        }
    }

    /// Borra una clave. Retorna el numero de claves borradas (0 o 1).
    #[instrument(skip(self))]
    pub async fn del(&mut self, key: &str) -> crate::Result<u64> {
        let frame = Del::new(key).into_frame();
        debug!(request = ?frame);

        match self.request(&frame).await? {
            Frame::Integer(response) => Ok(response),
            frame => Err(frame.to_error()),
        }
    }

    /// Borra la clave solo si su valor es igual a `value`, de forma
    /// atomica en el servidor. Retorna `true` si se ha borrado.
    #[instrument(skip(self))]
    pub async fn del_if_eq(&mut self, key: &str, value: Bytes) -> crate::Result<bool> {
        let frame = DelIfEq::new(key, value).into_frame();
        debug!(request = ?frame);

        match self.request(&frame).await? {
            Frame::Integer(response) => Ok(response == 1),
            frame => Err(frame.to_error()),
        }
    }

    /// Asigna una expiracion a una clave existente. Retorna `false` si la
    /// clave no existe.
    #[instrument(skip(self))]
    pub async fn expire(&mut self, key: &str, ttl: Duration) -> crate::Result<bool> {
        let frame = Expire::new(key, ttl).into_frame();
        debug!(request = ?frame);

        match self.request(&frame).await? {
            Frame::Integer(response) => Ok(response == 1),
            frame => Err(frame.to_error()),
        }
    }

    /// Publica `message` en el canal `channel`.
    ///
    /// Retorna el numero de subscriptores que estaban escuchando el canal
    /// en el momento del envio. No hay garantia de que todos lo reciban.
    #[instrument(skip(self))]
    pub async fn publish(&mut self, channel: &str, message: Bytes) -> crate::Result<u64> {
        let frame = Publish::new(channel, message).into_frame();
        debug!(request = ?frame);

        match self.request(&frame).await? {
            Frame::Integer(response) => Ok(response),
            frame => Err(frame.to_error()),
        }
    }

    /// Subscribe el cliente a los canales indicados.
    ///
    /// El cliente pasa a modo pub/sub, por eso se consume `self` y se
    /// retorna un `Subscriber`.
    #[instrument(skip(self))]
    pub async fn subscribe(mut self, channels: Vec<String>) -> crate::Result<Subscriber> {
        self.subscribe_cmd(&channels).await?;

        Ok(Subscriber {
            client: self,
            subscribed_channels: channels,
        })
    }

    /// `true` si la conexion puede volver a utilizarse para otra peticion.
    pub(crate) fn is_reusable(&self) -> bool {
        !self.dirty
    }

    /// Un `Err` si una peticion anterior se abandono antes de leer su
    /// respuesta. Esa respuesta llegaria como respuesta del siguiente
    /// comando, asi que la conexion ya no se puede utilizar.
    fn ensure_clean(&self) -> crate::Result<()> {
        if self.dirty {
            return Err("connection has an unfinished request".into());
        }

        Ok(())
    }

    /// Envia `SUBSCRIBE` y espera la confirmacion de cada canal.
    async fn subscribe_cmd(&mut self, channels: &[String]) -> crate::Result<()> {
        // Sin canales el servidor responde con un error que se leeria
        // despues como si fuera un mensaje.
        if channels.is_empty() {
            return Err("at least one channel is required to subscribe".into());
        }

        self.ensure_clean()?;

        let frame = Subscribe::new(channels).into_frame();
        debug!(request = ?frame);

        self.dirty = true;
        self.connection.write_frame(&frame).await?;

        // El servidor confirma cada canal con un frame
        // `[subscribe, <canal>, <num-subscripciones>]`.
        for channel in channels {
            let response = self.read_response().await?;
            let (subscribed, _) = parse_ack(response, "subscribe")?;

            if subscribed != *channel {
                return Err(format!(
                    "protocol error; expected subscription to `{}`, got `{}`",
                    channel, subscribed
                )
                .into());
            }
        }

        self.dirty = false;

        Ok(())
    }

    /// Envia un frame y lee la respuesta.
    ///
    /// Mientras la respuesta no se ha leido completa el cliente queda
    /// marcado como `dirty`. Si el futuro se abandona en ese estado (por
    /// un timeout o una cancelacion) las peticiones posteriores fallan.
    async fn request(&mut self, frame: &Frame) -> crate::Result<Frame> {
        self.ensure_clean()?;

        self.dirty = true;
        self.connection.write_frame(frame).await?;

        let response = self.read_response().await;
        if response.is_ok() {
            self.dirty = false;
        }

        match response? {
            Frame::Error(msg) => Err(msg.into()),
            frame => Ok(frame),
        }
    }

    /// Lee un frame de respuesta.
    ///
    /// Un frame `Error` se retorna tal cual; es `request` quien lo
    /// convierte en `Err` una vez la conexion ha quedado limpia.
    async fn read_response(&mut self) -> crate::Result<Frame> {
        let response = self.connection.read_frame().await?;

        debug!(?response);

        match response {
            Some(frame) => Ok(frame),
            None => {
                // `None` indica que el servidor ha cerrado la conexion
                // sin enviar la respuesta.
                let err = Error::new(ErrorKind::ConnectionReset, "connection reset by server");

                Err(err.into())
            }
        }
    }
}

impl Subscriber {
    /// Canales a los que esta subscrito.
    pub fn get_subscribed(&self) -> &[String] {
        &self.subscribed_channels
    }

    /// Recibe el siguiente mensaje publicado en alguno de los canales.
    ///
    /// `None` indica que el servidor ha cerrado la conexion.
    pub async fn next_message(&mut self) -> crate::Result<Option<Message>> {
        match self.client.connection.read_frame().await? {
            Some(frame) => {
                debug!(?frame);

                parse_message(frame).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Convierte el `Subscriber` en un `Stream` de mensajes.
    ///
    /// El stream termina cuando el servidor cierra la conexion o tras el
    /// primer error.
    pub fn into_stream(mut self) -> impl Stream<Item = crate::Result<Message>> {
        try_stream! {
            while let Some(message) = self.next_message().await? {
                yield message;
            }
        }
    }

    /// Subscribe a una lista de nuevos canales
    #[instrument(skip(self))]
    pub async fn subscribe(&mut self, channels: &[String]) -> crate::Result<()> {
        self.client.subscribe_cmd(channels).await?;

        self.subscribed_channels
            .extend(channels.iter().map(Clone::clone));

        Ok(())
    }

    /// Elimina la subscripcion a los canales indicados, o a todos si la
    /// lista esta vacia.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&mut self, channels: &[String]) -> crate::Result<()> {
        // Sin canales, el servidor confirma cada una de las subscripciones.
        let num = if channels.is_empty() {
            self.subscribed_channels.len()
        } else {
            channels.len()
        };

        // Sin ninguna subscripcion el servidor enviaria una confirmacion
        // sin canal que no se espera; no hay nada que hacer.
        if num == 0 {
            return Ok(());
        }

        self.client.ensure_clean()?;

        let frame = Unsubscribe::new(channels).into_frame();
        debug!(request = ?frame);

        self.client.dirty = true;
        self.client.connection.write_frame(&frame).await?;

        for _ in 0..num {
            let response = self.client.read_response().await?;
            let (channel, _) = parse_ack(response, "unsubscribe")?;

            let len = self.subscribed_channels.len();
            self.subscribed_channels.retain(|c| *c != channel);

            if self.subscribed_channels.len() == len {
                return Err(format!("protocol error; not subscribed to `{}`", channel).into());
            }
        }

        self.client.dirty = false;

        Ok(())
    }
}

/// Decodifica una confirmacion `[kind, <canal>, <num-subscripciones>]`.
fn parse_ack(frame: Frame, kind: &str) -> crate::Result<(String, u64)> {
    let mut parse = Parse::new(frame)?;

    let ack = parse.next_string()?;
    if ack != kind {
        return Err(format!("protocol error; expected `{}`, got `{}`", kind, ack).into());
    }

    let channel = parse.next_string()?;
    let count = parse.next_int()?;
    parse.finish()?;

    Ok((channel, count))
}

/// Decodifica un mensaje `[message, <canal>, <contenido>]`.
fn parse_message(frame: Frame) -> crate::Result<Message> {
    let mut parse = Parse::new(frame)?;

    let kind = parse.next_string()?;
    if kind != "message" {
        return Err(format!("protocol error; expected `message`, got `{}`", kind).into());
    }

    let channel = parse.next_string()?;
    let content = parse.next_bytes()?;
    parse.finish()?;

    Ok(Message { channel, content })
}
