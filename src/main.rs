//! The application layer above the WebSocket core: wires `Server::accept`
//! events to the browser protocol glue (spec.md §4.G) and runs the
//! single-threaded event loop to completion.

use clap::Parser;
use log::{error, info};

use chatserver::event::Event;
use chatserver::protocol::Envelope;
use chatserver::{Config, Server};

fn main() {
    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = Config::parse();
    let mut server = Server::new(config);

    if let Err(e) = server.listen() {
        error!("failed to start listening: {e}");
        std::process::exit(1);
    }

    loop {
        match server.accept() {
            Event::Connected(id) => {
                info!("client {id} connected");
                let welcome = Envelope::system(format!("client {id} joined"));
                let _ = server.broadcast(&welcome.to_json());
            }
            Event::Disconnected(id) => {
                info!("client {id} disconnected");
                let goodbye = Envelope::system(format!("client {id} left"));
                let _ = server.broadcast(&goodbye.to_json());
            }
            Event::Message(id, text) => {
                let envelope = Envelope::message(id, text);
                let _ = server.broadcast(&envelope.to_json());
            }
            Event::Error(description) => {
                error!("{description}");
            }
            Event::Shutdown => {
                info!("server shutting down");
                break;
            }
        }
    }
}
