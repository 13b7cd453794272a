use futures_util::{SinkExt, StreamExt};
use gw_codec::Encoding;
use gw_protocol::{ControlMessage, RequestEnvelope, ResponseEnvelope};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn encoding_for(sdk_type: &str) -> Encoding {
    match sdk_type {
        "js" => Encoding::Json,
        _ => Encoding::StructuredBinary,
    }
}

/// A bare WebSocket client speaking the gateway's real upgrade query
/// parameters and envelope wire format, for integration tests that drive a
/// live `services/gateway` instance end to end. Request/response envelopes
/// travel as WebSocket binary frames in the session's negotiated encoding;
/// `ControlMessage` pings/pongs travel as JSON text frames, matching the
/// gateway's own split between its data plane and its keepalive channel.
pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
    encoding: Encoding,
}

impl MockWsClient {
    /// Connect with the minimum required upgrade query parameters. Omitting
    /// `sdkType` negotiates the default (`go` -> structured-binary).
    pub async fn connect(
        base_url: &str,
        token: &str,
        send_id: &str,
        platform_id: i32,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let url = format!("{base_url}?token={token}&sendID={send_id}&platformID={platform_id}");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self {
            write,
            read,
            encoding: Encoding::StructuredBinary,
        })
    }

    /// Connect with the full set of optional upgrade parameters plus an
    /// `X-Forwarded-For` header, exercising the remote-address derivation
    /// path a plain query-param connect doesn't reach.
    pub async fn connect_full(
        base_url: &str,
        token: &str,
        send_id: &str,
        platform_id: i32,
        sdk_type: &str,
        compression: Option<&str>,
        forwarded_for: Option<&str>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut url = format!(
            "{base_url}?token={token}&sendID={send_id}&platformID={platform_id}&sdkType={sdk_type}"
        );
        if let Some(c) = compression {
            url.push_str(&format!("&compression={c}"));
        }
        let uri: tokio_tungstenite::tungstenite::http::Uri = url.parse()?;
        let host = uri.host().unwrap_or("localhost").to_owned();
        let host_header = match uri.port_u16() {
            Some(p) => format!("{host}:{p}"),
            None => host,
        };
        use tokio_tungstenite::tungstenite::handshake::client::generate_key;
        let mut builder = Request::builder()
            .uri(url)
            .header("Host", host_header)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key());
        if let Some(ip) = forwarded_for {
            builder = builder.header("X-Forwarded-For", ip);
        }
        let request = builder.body(())?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws_stream.split();
        Ok(Self {
            write,
            read,
            encoding: encoding_for(sdk_type),
        })
    }

    pub async fn send_envelope(&mut self, env: &RequestEnvelope) -> Result<(), Box<dyn std::error::Error>> {
        let bytes = gw_codec::encode(self.encoding, env)?;
        self.write.send(Message::Binary(bytes.into())).await?;
        Ok(())
    }

    pub async fn send_control(&mut self, msg: &ControlMessage) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(msg)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Receive the next frame, dispatching to whichever shape it arrived as:
    /// a binary data-plane response envelope, or a JSON text control message.
    pub async fn recv(&mut self) -> Result<WireFrame, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(WireFrame::Control(serde_json::from_str(&text)?)),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(WireFrame::Response(gw_codec::decode(self.encoding, &bytes)?));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum WireFrame {
    Response(ResponseEnvelope),
    Control(ControlMessage),
}
