//! Listens where the real server would and hands every connection to its own
//! session task.

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::{config::Config, lifecycle::Lifecycle, session::Session};

pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
    lifecycle: Lifecycle,
}

impl Server {
    pub async fn bind(config: Arc<Config>, lifecycle: Lifecycle) -> eyre::Result<Self> {
        let addr = format!("{}:{}", config.listen.addr, config.listen.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("listening on {addr}");
        Ok(Self {
            listener,
            config,
            lifecycle,
        })
    }

    /// Useful when binding to port 0 in tests.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> eyre::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    debug!("connection from {remote}");
                    // status pings are tiny, don't batch them up
                    let _ = stream.set_nodelay(true);
                    let session =
                        Session::new(stream, remote, self.config.clone(), self.lifecycle.clone());
                    tokio::spawn(async move {
                        if let Err(err) = session.run().await {
                            debug!("session from {remote} ended with error: {err}");
                        }
                    });
                }
                Err(err) => {
                    error!("failed to accept a connection: {err}");
                }
            }
        }
    }
}
