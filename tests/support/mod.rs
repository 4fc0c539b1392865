//! Servidor RESP minimo para los tests de red.
//!
//! Entiende solo los comandos que envia el cliente y los ejecuta sobre un
//! `Db` en memoria.

#![allow(dead_code)]

use setnx_lease::{Connection, Db, DbDropGuard, Frame, Message};

use bytes::Bytes;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::{Stream, StreamExt, StreamMap};

pub struct TestServer {
    pub addr: SocketAddr,
    pub db: Db,
    _guard: DbDropGuard,
}

/// Arranca el servidor en el runtime actual. Con `password` los comandos
/// requieren `AUTH` previo.
pub async fn start(password: Option<&'static str>) -> TestServer {
    launch(password, Duration::ZERO).await
}

/// Como `start`, pero cada respuesta se envia `delay` despues de ejecutar
/// el comando.
pub async fn start_slow(delay: Duration) -> TestServer {
    launch(None, delay).await
}

async fn launch(password: Option<&'static str>, delay: Duration) -> TestServer {
    let guard = DbDropGuard::new();
    let db = guard.db();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_db = db.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(Connection::new(socket), server_db.clone(), password, delay));
        }
    });

    TestServer {
        addr,
        db,
        _guard: guard,
    }
}

/// Arranca el servidor en un thread propio, para los tests bloqueantes.
pub fn start_in_background(password: Option<&'static str>) -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async move {
            let server = start(password).await;
            tx.send(server.addr).unwrap();

            // El servidor vive mientras viva el proceso de test.
            std::future::pending::<()>().await
        });
    });

    rx.recv().unwrap()
}

async fn serve(mut conn: Connection, db: Db, password: Option<&'static str>, delay: Duration) {
    let mut authenticated = password.is_none();

    while let Ok(Some(frame)) = conn.read_frame().await {
        let args = match args(frame) {
            Some(args) if !args.is_empty() => args,
            _ => return,
        };

        let name = String::from_utf8_lossy(&args[0]).to_lowercase();

        if authenticated && name == "subscribe" {
            let channels = args[1..].iter().map(text).collect();
            return subscribed(conn, db, channels).await;
        }

        let response = if !authenticated && name != "auth" {
            Frame::Error("NOAUTH Authentication required.".into())
        } else {
            match (name.as_str(), &args[1..]) {
                ("auth", [pw]) => {
                    if Some(&pw[..]) == password.map(str::as_bytes) {
                        authenticated = true;
                        Frame::Simple("OK".into())
                    } else {
                        Frame::Error("WRONGPASS invalid username-password pair".into())
                    }
                }
                ("ping", []) => Frame::Simple("PONG".into()),
                // No se responde nunca: simula un servidor colgado.
                ("ping", [msg]) if &msg[..] == b"stall" => continue,
                ("ping", [msg]) => Frame::Bulk(msg.clone()),
                ("get", [key]) => db.get(&text(key)).map(Frame::Bulk).unwrap_or(Frame::Null),
                ("set", [key, value, opts @ ..]) => set(&db, text(key), value.clone(), opts),
                ("del", [key]) => Frame::Integer(db.delete(&text(key)) as u64),
                ("pexpire", [key, ms]) => {
                    Frame::Integer(db.expire(&text(key), Duration::from_millis(number(ms))) as u64)
                }
                ("publish", [channel, msg]) => {
                    Frame::Integer(db.publish(&text(channel), msg.clone()) as u64)
                }
                ("eval", [_script, numkeys, key, value]) if &numkeys[..] == b"1" => {
                    Frame::Integer(db.delete_if_eq(&text(key), value) as u64)
                }
                _ => Frame::Error(format!("ERR unknown command '{}'", name)),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if conn.write_frame(&response).await.is_err() {
            return;
        }
    }
}

/// Modo pub/sub: la conexion solo acepta `SUBSCRIBE` y `UNSUBSCRIBE`.
async fn subscribed(mut conn: Connection, db: Db, channels: Vec<String>) {
    type Messages = Pin<Box<dyn Stream<Item = setnx_lease::Result<Message>> + Send>>;

    let mut subscriptions: StreamMap<String, Messages> = StreamMap::new();

    if subscribe(&mut conn, &db, &mut subscriptions, channels).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            Some((_, Ok(message))) = subscriptions.next() => {
                let frame = push("message", &message.channel, Frame::Bulk(message.content));
                if conn.write_frame(&frame).await.is_err() {
                    return;
                }
            }
            frame = conn.read_frame() => {
                let args = match frame {
                    Ok(Some(frame)) => match args(frame) {
                        Some(args) if !args.is_empty() => args,
                        _ => return,
                    },
                    _ => return,
                };

                let channels: Vec<String> = args[1..].iter().map(text).collect();

                let res = match &String::from_utf8_lossy(&args[0]).to_lowercase()[..] {
                    "subscribe" => subscribe(&mut conn, &db, &mut subscriptions, channels).await,
                    "unsubscribe" => {
                        let channels = if channels.is_empty() {
                            subscriptions.keys().cloned().collect()
                        } else {
                            channels
                        };

                        let mut res = Ok(());
                        for channel in channels {
                            subscriptions.remove(&channel);
                            let count = Frame::Integer(subscriptions.len() as u64);
                            res = conn.write_frame(&push("unsubscribe", &channel, count)).await;
                            if res.is_err() {
                                break;
                            }
                        }
                        res
                    }
                    _ => conn.write_frame(&Frame::Error("ERR only (UN)SUBSCRIBE allowed in this context".into())).await,
                };

                if res.is_err() {
                    return;
                }
            }
        }
    }
}

async fn subscribe(
    conn: &mut Connection,
    db: &Db,
    subscriptions: &mut StreamMap<String, Pin<Box<dyn Stream<Item = setnx_lease::Result<Message>> + Send>>>,
    channels: Vec<String>,
) -> std::io::Result<()> {
    for channel in channels {
        let messages = db.messages(&[channel.clone()]);
        subscriptions.insert(channel.clone(), Box::pin(messages));

        let count = Frame::Integer(subscriptions.len() as u64);
        conn.write_frame(&push("subscribe", &channel, count)).await?;
    }

    Ok(())
}

fn push(kind: &'static str, channel: &str, last: Frame) -> Frame {
    Frame::Array(vec![
        Frame::Bulk(Bytes::from_static(kind.as_bytes())),
        Frame::Bulk(Bytes::from(channel.to_string())),
        last,
    ])
}

fn set(db: &Db, key: String, value: Bytes, opts: &[Bytes]) -> Frame {
    let mut expire = None;
    let mut only_if_absent = false;

    let mut opts = opts.iter();
    while let Some(opt) = opts.next() {
        match &opt.to_ascii_lowercase()[..] {
            b"px" => match opts.next().map(number) {
                Some(0) => return Frame::Error("ERR invalid expire time in 'set' command".into()),
                Some(ms) => expire = Some(Duration::from_millis(ms)),
                None => return Frame::Error("ERR syntax error".into()),
            },
            b"nx" => only_if_absent = true,
            _ => return Frame::Error("ERR syntax error".into()),
        }
    }

    if !only_if_absent {
        db.set(key, value, expire);
        return Frame::Simple("OK".into());
    }

    match expire {
        Some(expire) if db.set_nx(key, value, expire) => Frame::Simple("OK".into()),
        Some(_) => Frame::Null,
        None => Frame::Error("ERR test server only supports NX with PX".into()),
    }
}

/// Los argumentos de un comando: un array de bulks.
fn args(frame: Frame) -> Option<Vec<Bytes>> {
    match frame {
        Frame::Array(parts) => parts
            .into_iter()
            .map(|part| match part {
                Frame::Bulk(data) => Some(data),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn text(data: &Bytes) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn number(data: &Bytes) -> u64 {
    text(data).parse().unwrap()
}
