use {super::*, rpc::RpcNode, server::StratumServer};

#[derive(Debug, Parser)]
pub(crate) struct Serve {
    #[arg(long, help = "Listen on <STRATUM_PORT>. [default: per chain]")]
    pub(crate) stratum_port: Option<u16>,

    #[arg(
        long = "stratum-bind",
        help = "Bind stratum on <HOST[:PORT]>. May be given multiple times."
    )]
    pub(crate) stratum_bind: Vec<String>,

    #[arg(
        long = "stratum-allow-ip",
        help = "Allow stratum connections from <SUBNET>. May be given multiple times. Loopback is always allowed."
    )]
    pub(crate) stratum_allow_ip: Vec<Subnet>,

    #[arg(long, help = "Poll the node every <UPDATE_INTERVAL> seconds.")]
    pub(crate) update_interval: Option<u64>,
}

impl Serve {
    pub(crate) async fn run(self, options: Options, cancel_token: CancellationToken) -> Result {
        let chain = options.chain();
        let network = chain.network();

        let sharechain = options.sharechain();
        info!("Using share chain '{sharechain}'");

        let port = self.stratum_port.unwrap_or(chain.default_stratum_port());

        let endpoints = if self.stratum_bind.is_empty() {
            vec![SocketAddr::from(([0, 0, 0, 0], port))]
        } else {
            self.stratum_bind
                .iter()
                .map(|bind| parse_endpoint(bind, port))
                .collect::<Result<Vec<SocketAddr>>>()?
        };

        if !self.stratum_allow_ip.is_empty() {
            info!(
                "Allowing stratum connections from: {}",
                self.stratum_allow_ip
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<String>>()
                    .join(" ")
            );
        }

        let (node, tip_rx) = RpcNode::new(&options.rpc_url(), options.rpc_auth(), network)?;

        // Tip and mempool poller driving the watcher between its periodic
        // wakes.
        let poll_interval = Duration::from_secs(self.update_interval.unwrap_or(10));
        let poller = tokio::spawn({
            let node = node.clone();
            let cancel = cancel_token.clone();
            async move {
                let mut ticker = interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let node = node.clone();
                            match tokio::task::spawn_blocking(move || node.poll()).await {
                                Ok(Err(err)) => warn!("Failed to poll the node: {err}"),
                                Err(err) => warn!("Node poll task failed: {err}"),
                                Ok(Ok(())) => {}
                            }
                        }
                    }
                }
            }
        });

        let server = StratumServer::new(node, Arc::new(mergemine::Disabled), network);
        let result = server
            .run(endpoints, self.stratum_allow_ip, tip_rx, cancel_token)
            .await;

        poller.abort();
        let _ = poller.await;

        result
    }
}

fn parse_endpoint(bind: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(endpoint) = bind.parse::<SocketAddr>() {
        return Ok(endpoint);
    }

    if let Ok(ip) = bind.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    bail!("invalid stratum bind endpoint '{bind}'")
}
