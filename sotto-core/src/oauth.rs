use std::{
    io::{BufRead, BufReader, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    sync::mpsc,
    thread,
    time::Duration,
};

use oauth2::PkceCodeChallenge;
use url::Url;

use crate::{error::Error, webapi::Client};

/// Drive a provider sign-in end to end: generate PKCE material, bind the
/// loopback listener, hand the authorization URL to `open_url`, wait for the
/// redirect carrying the authorization code and exchange it for a session.
/// The listener is bound before the browser opens, so the redirect cannot
/// race an unbound port.
pub fn sign_in_with_provider(
    client: &Client,
    provider: &str,
    redirect_port: u16,
    timeout: Duration,
    open_url: impl FnOnce(&str),
) -> Result<(), Error> {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let socket_address = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), redirect_port);
    let listener = TcpListener::bind(socket_address)?;

    let redirect_to = format!("http://{socket_address}/callback");
    let auth_url = client.authorize_url(provider, &redirect_to, challenge.as_str())?;
    log::info!("starting {provider} sign-in, waiting for the redirect on {socket_address}");
    open_url(&auth_url);

    let code = wait_for_callback_parameter(listener, timeout, "code")?;
    client.exchange_code_for_session(&code, verifier.secret())
}

/// Accept a single connection on `listener` and pull `parameter_name` out of
/// its request line.  The browser gets a small confirmation page back.
fn wait_for_callback_parameter(
    listener: TcpListener,
    timeout: Duration,
    parameter_name: &'static str,
) -> Result<String, Error> {
    let (tx, rx) = mpsc::channel::<Result<String, Error>>();

    let handle = thread::spawn(move || {
        match listener.accept() {
            Ok((mut stream, _)) => {
                let _ = tx.send(read_callback_parameter(&mut stream, parameter_name));
            }
            Err(err) => {
                let _ = tx.send(Err(Error::IoError(err)));
            }
        }
    });

    let result = rx.recv_timeout(timeout).map_err(Error::from)?;
    if handle.join().is_err() {
        log::warn!("callback listener thread panicked");
    }
    result
}

fn read_callback_parameter(
    stream: &mut TcpStream,
    parameter_name: &'static str,
) -> Result<String, Error> {
    let mut request_line = String::new();
    BufReader::new(&mut *stream).read_line(&mut request_line)?;

    match extract_parameter_from_request(&request_line, parameter_name) {
        Some(value) => {
            log::info!("received callback parameter '{parameter_name}'");
            send_success_response(stream);
            Ok(value)
        }
        None => Err(Error::OAuthError(format!(
            "no '{parameter_name}' parameter in callback request: {}",
            request_line.trim_end()
        ))),
    }
}

fn extract_parameter_from_request(request_line: &str, parameter_name: &str) -> Option<String> {
    request_line
        .split_whitespace()
        .nth(1)
        .and_then(|path| Url::parse(&format!("http://localhost{path}")).ok())
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == parameter_name)
                .map(|(_, value)| value.into_owned())
        })
}

fn send_success_response(stream: &mut TcpStream) {
    let response = "HTTP/1.1 200 OK\r\n\r\n\
        <html>\
        <head>\
            <style>\
                body {\
                    background-color: #121212;\
                    color: #ffffff;\
                    font-family: sans-serif;\
                    display: flex;\
                    justify-content: center;\
                    align-items: center;\
                    height: 100vh;\
                    margin: 0;\
                }\
            </style>\
        </head>\
        <body>\
            <div>Signed in! You can close this window now.</div>\
        </body>\
        </html>";
    let _ = stream.write_all(response.as_bytes());
}
