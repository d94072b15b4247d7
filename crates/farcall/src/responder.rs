//! # Responder
//!
//! The server end of the wire: accepts connections, decodes calls, runs a
//! handler per call and writes each reply as soon as it is ready. Replies on
//! one connection may therefore leave in a different order than their calls
//! arrived.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::debug;
use tracing::info;
use tracing::warn;

use farwire::Codec;
use farwire::FaultKind;
use farwire::Frame;
use farwire::JsonCodec;
use farwire::RemoteFault;
use farwire::Request;
use farwire::Response;

use crate::transport::TcpTransport;
use crate::transport::Transport;

/// Serves calls on `listener` until accepting fails.
pub async fn serve<H, Fut>(listener: TcpListener, handler: H) -> std::io::Result<()>
where
    H: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let handler = Arc::new(handler);
    let codec: Arc<dyn Codec> = Arc::new(JsonCodec);

    loop {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(%peer, "accepted connection");

        let transport: Arc<dyn Transport> =
            Arc::new(TcpTransport::new(stream, farwire::DEFAULT_MAX_FRAME_LEN));
        tokio::spawn(serve_connection(
            transport,
            Arc::clone(&codec),
            Arc::clone(&handler),
        ));
    }
}

/// Serves calls arriving on one transport until it closes.
pub async fn serve_connection<H, Fut>(
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    handler: Arc<H>,
) where
    H: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    loop {
        let bytes = match transport.recv().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "connection read failed");
                break;
            }
        };

        let request = match codec.decode(&bytes) {
            Ok(Frame::Call(request)) => request,
            Ok(Frame::Reply(response)) => {
                warn!(id = %response.id, "ignoring reply frame sent by client");
                continue;
            }
            Err(e) => {
                let Ok(id) = codec.peek_id(&bytes) else {
                    warn!(error = %e, "dropping unattributable frame");
                    continue;
                };
                let fault = RemoteFault::new(FaultKind::BadArguments, e.to_string());
                reply(&*transport, &*codec, Response::fault(id, fault)).await;
                continue;
            }
        };

        let transport = Arc::clone(&transport);
        let codec = Arc::clone(&codec);
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let response = (*handler)(request).await;
            reply(&*transport, &*codec, response).await;
        });
    }
    debug!("connection finished");
}

async fn reply(transport: &dyn Transport, codec: &dyn Codec, response: Response) {
    let id = response.id.clone();
    let payload = match codec.encode(&Frame::Reply(response)) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(%id, error = %e, "cannot encode reply");
            let fault = RemoteFault::new(FaultKind::Internal, e.to_string());
            match codec.encode(&Frame::Reply(Response::fault(id.clone(), fault))) {
                Ok(payload) => payload,
                Err(_) => return,
            }
        }
    };

    if let Err(e) = transport.send(&payload).await {
        warn!(%id, error = %e, "cannot send reply");
    }
}
