use {super::*, tokio::net::TcpStream};

/// The stratum server: listeners, per-connection sessions, and the work
/// watcher, all sharing one state value behind one lock.
pub struct StratumServer {
    node: Arc<dyn Node>,
    mergemine: Arc<dyn MergeMine>,
    network: Network,
    state: Mutex<ServerState>,
}

struct ServerState {
    templates: TemplateStore,
    second_stages: HashMap<String, (ChainId, SecondStageWork)>,
    clients: HashMap<u64, ClientHandle>,
    next_connection_id: u64,
}

struct ClientHandle {
    client: StratumClient,
    outbound: mpsc::UnboundedSender<String>,
}

impl StratumServer {
    pub fn new(
        node: Arc<dyn Node>,
        mergemine: Arc<dyn MergeMine>,
        network: Network,
    ) -> Arc<Self> {
        Arc::new(Self {
            node,
            mergemine,
            network,
            state: Mutex::new(ServerState {
                templates: TemplateStore::new(),
                second_stages: HashMap::new(),
                clients: HashMap::new(),
                next_connection_id: 0,
            }),
        })
    }

    /// Bind the given endpoints and serve until cancelled. Fails when no
    /// endpoint can be bound at all.
    pub async fn run(
        self: Arc<Self>,
        endpoints: Vec<SocketAddr>,
        allow: Vec<Subnet>,
        tip_rx: watch::Receiver<BlockHash>,
        cancel: CancellationToken,
    ) -> Result {
        let mut listeners = Vec::new();

        for endpoint in endpoints {
            match TcpListener::bind(endpoint).await {
                Ok(listener) => {
                    info!("Binding stratum on {}", listener.local_addr()?);
                    listeners.push(listener);
                }
                Err(err) => {
                    warn!("Binding stratum on {endpoint} failed: {err}");
                }
            }
        }

        if listeners.is_empty() {
            bail!("unable to bind any endpoint for stratum server");
        }

        let allow = Arc::new(allow);
        let mut tasks = JoinSet::new();

        tasks.spawn(self.clone().watcher(tip_rx, cancel.clone()));

        for listener in listeners {
            let server = self.clone();
            let allow = allow.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                server.accept_loop(listener, allow, cancel).await;
            });
        }

        while tasks.join_next().await.is_some() {}

        let mut state = self.state.lock().await;
        for handle in state.clients.values() {
            info!(
                "Closing stratum connection to {} due to process termination",
                handle.client.peer
            );
        }
        state.clients.clear();
        state.second_stages.clear();
        state.templates.clear();

        Ok(())
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        allow: Arc<Vec<Subnet>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if !subnet::client_allowed(&allow, peer.ip()) {
                            debug!("Rejected connection from disallowed subnet: {peer}");
                            continue;
                        }

                        if let Err(err) = stream.set_nodelay(true) {
                            debug!("Failed to disable Nagle for {peer}: {err}");
                        }

                        info!("Accepted stratum connection from {peer}");

                        let server = self.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, peer, cancel).await;
                        });
                    }
                    Err(err) => {
                        warn!("Failed to accept stratum connection: {err}");
                    }
                }
            }
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) {
        let (reader, writer) = stream.into_split();
        let mut reader = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE));
        let mut writer = FramedWrite::new(writer, LinesCodec::new());

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let connection_id = {
            let mut state = self.state.lock().await;
            let connection_id = state.next_connection_id;
            state.next_connection_id += 1;
            state.clients.insert(
                connection_id,
                ClientHandle {
                    client: StratumClient::new(peer),
                    outbound,
                },
            );
            connection_id
        };

        'serve: loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'serve,
                Some(line) = outbound_rx.recv() => {
                    if writer.send(line).await.is_err() {
                        break 'serve;
                    }
                }
                next = reader.next() => match next {
                    Some(Ok(line)) => {
                        for reply in self.process_line(connection_id, &line).await {
                            if writer.send(reply).await.is_err() {
                                break 'serve;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        debug!("Error detected on stratum connection from {peer}: {err}");
                        break 'serve;
                    }
                    None => {
                        debug!("Remote disconnect received on stratum connection from {peer}");
                        break 'serve;
                    }
                }
            }
        }

        let mut state = self.state.lock().await;
        state.clients.remove(&connection_id);
        info!("Closing stratum connection from {peer}");
    }

    /// Handle one request line and return everything to write back: the
    /// reply, plus any freshly generated work the handler flagged.
    async fn process_line(&self, connection_id: u64, line: &str) -> Vec<String> {
        debug!("Received stratum request: {line}");

        let mut replies = Vec::new();

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        match parse_request(line) {
            Ok(Some((id, method, params))) => {
                let outcome = self.dispatch(state, connection_id, &method, params);
                replies.push(
                    match outcome {
                        Ok(result) => Message::response(id, result),
                        Err(error) => Message::error(id, &error),
                    }
                    .to_line(),
                );
            }
            Ok(None) => {
                debug!("Ignoring JSON-RPC response");
            }
            Err(error) => {
                replies.push(Message::error(Id::Null, &error).to_line());
            }
        }

        let ServerState {
            templates,
            second_stages,
            clients,
            ..
        } = state;

        if let Some(handle) = clients.get_mut(&connection_id) {
            if handle.client.send_work {
                handle.client.send_work = false;
                match work::generate(
                    templates,
                    second_stages,
                    &mut handle.client,
                    &*self.node,
                    &*self.mergemine,
                ) {
                    Ok(lines) => replies.extend(lines),
                    Err(error) => {
                        debug!("Error generating stratum work unit: {error}");
                        replies.push(Message::error(Id::Null, &error).to_line());
                    }
                }
            }
        }

        replies
    }

    fn dispatch(
        &self,
        state: &mut ServerState,
        connection_id: u64,
        method: &str,
        params: Value,
    ) -> Result<Value, StratumError> {
        let ServerState {
            templates,
            second_stages,
            clients,
            ..
        } = state;

        let handle = clients
            .get_mut(&connection_id)
            .ok_or_else(|| StratumError::internal("unknown stratum connection"))?;
        let client = &mut handle.client;

        match method {
            "mining.subscribe" => Self::subscribe(client, params),
            "mining.authorize" => self.authorize(client, params),
            "mining.configure" => Self::configure(client, params),
            "mining.submit" => self.submit(templates, second_stages, client, params),
            "mining.extranonce.subscribe" => Self::extranonce_subscribe(client, params),
            _ => Err(StratumError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }

    fn subscribe(client: &mut StratumClient, params: Value) -> Result<Value, StratumError> {
        bound_params("mining.subscribe", &params, 0, 2)?;

        let subscribe: Subscribe = serde_json::from_value(params)
            .map_err(|err| StratumError::invalid_params(err.to_string()))?;

        if let Some(user_agent) = subscribe.user_agent {
            debug!("Received subscription from client {user_agent}");
            client.user_agent = Some(user_agent);
        }

        // The resume id would be for session resumption, which we do not
        // support.

        // Some mining proxies (e.g. Nicehash) reject connections that don't
        // see a reasonable difficulty on first contact, in serialized float
        // format no less. The real value arrives with the first work unit.
        let result = SubscribeResult {
            subscriptions: vec![
                ("mining.set_difficulty".into(), "1e+06".into()),
                (
                    "mining.notify".into(),
                    "ae6812eb4cd7735a302a8a9dd95cf71f".into(),
                ),
            ],
            // supports_extranonce is still false here, so the context is
            // unused either way.
            extranonce1: Extranonce::from_bytes(&client.extranonce1(&[0u8; 32])),
            extranonce2_size: EXTRANONCE2_SIZE as u32,
        };

        Ok(json!(result))
    }

    fn authorize(&self, client: &mut StratumClient, params: Value) -> Result<Value, StratumError> {
        bound_params("mining.authorize", &params, 1, 2)?;

        let authorize: Authorize = serde_json::from_value(params)
            .map_err(|err| StratumError::invalid_params(err.to_string()))?;

        let mut username = authorize.username.trim().to_string();

        // No user authorization happens here; the password field instead
        // carries merge-mining options.
        let password = authorize.password.unwrap_or_default();

        let chain_names = self.mergemine.chain_names();
        let mut mmauth: BTreeMap<ChainId, (String, String)> = BTreeMap::new();

        for option in password.split(',').map(str::trim).filter(|opt| !opt.is_empty()) {
            if let Some((key, value)) = option.split_once('=') {
                let key = key.trim_end();
                let value = value.trim_start();

                let (aux_username, aux_password) = match value.split_once(':') {
                    Some((user, pass)) => (user.to_string(), pass.to_string()),
                    None => (value.to_string(), String::new()),
                };

                let chain = if let Some(chain) = chain_names.get(key) {
                    *chain
                } else {
                    match key.parse::<ChainId>() {
                        Ok(chain) if chain.is_plausible() => chain,
                        // At least 24 zero bytes: going out on a limb and
                        // saying this wasn't a hex-encoded aux-pow path.
                        _ => {
                            debug!(
                                "Skipping unrecognized stratum password keyword option \"{key}={value}\""
                            );
                            continue;
                        }
                    }
                };

                if mmauth.contains_key(&chain) {
                    debug!("Duplicate chain 0x{chain}; skipping");
                    continue;
                }

                debug!("Merge-mine chain 0x{chain} with username \"{aux_username}\"");
                mmauth.insert(chain, (aux_username, aux_password));
            } else if option.parse::<Address<NetworkUnchecked>>().is_ok() {
                let Some(chain) = self.mergemine.default_aux_pow_path() else {
                    debug!("No default aux-pow path; skipping stratum password option \"{option}\"");
                    continue;
                };

                if mmauth.contains_key(&chain) {
                    debug!("Duplicate chain 0x{chain} (default); skipping");
                    continue;
                }

                debug!("Merge-mine chain 0x{chain} with username \"{option}\"");
                mmauth.insert(chain, (option.to_string(), "x".into()));
            } else {
                debug!("Skipping unrecognized stratum password option \"{option}\"");
            }
        }

        let mut mindiff = 0.0;
        if let Some(position) = username.find('+') {
            let suffix = username[position + 1..].trim_start();
            mindiff = suffix.parse::<f64>().map_err(|_| {
                StratumError::invalid_params(format!("Invalid minimum difficulty: {suffix}"))
            })?;
            // Drop the '+' and everything after it.
            username.truncate(position);
            username.truncate(username.trim_end().len());
        }

        let address = username
            .parse::<Address<NetworkUnchecked>>()
            .ok()
            .and_then(|address| address.require_network(self.network).ok())
            .ok_or_else(|| {
                StratumError::invalid_params(format!("Invalid payout address: {username}"))
            })?;

        client.address = Some(address.clone());
        client.mmauth = mmauth;
        for (chain, (aux_username, aux_password)) in &client.mmauth {
            self.mergemine.register_client(*chain, aux_username, aux_password);
        }
        client.mindiff = mindiff;
        client.authorized = true;
        client.send_work = true;

        info!(
            "Authorized stratum miner {address} from {}, mindiff={mindiff}",
            client.peer
        );

        Ok(json!(true))
    }

    fn configure(client: &mut StratumClient, params: Value) -> Result<Value, StratumError> {
        bound_params("mining.configure", &params, 2, 2)?;

        let configure: Configure = serde_json::from_value(params)
            .map_err(|err| StratumError::invalid_params(err.to_string()))?;

        let mut result = serde_json::Map::new();

        for extension in &configure.extensions {
            if extension == "version-rolling" {
                let mask = configure.version_rolling_mask.ok_or_else(|| {
                    StratumError::invalid_params("version-rolling.mask is required")
                })?;

                client.version_rolling_mask =
                    mask.0.to_consensus() as u32 & VERSION_ROLLING_ALLOWED;

                result.insert("version-rolling".into(), json!(true));
                result.insert(
                    "version-rolling.mask".into(),
                    json!(format!("{:08x}", client.version_rolling_mask)),
                );

                debug!("Received version rolling request from {}", client.peer);
            } else {
                debug!(
                    "Unrecognized stratum extension '{extension}' sent by {}",
                    client.peer
                );
            }
        }

        Ok(Value::Object(result))
    }

    fn submit(
        &self,
        templates: &mut TemplateStore,
        second_stages: &mut HashMap<String, (ChainId, SecondStageWork)>,
        client: &mut StratumClient,
        params: Value,
    ) -> Result<Value, StratumError> {
        bound_params("mining.submit", &params, 5, 6)?;

        let submit: Submit = serde_json::from_value(params)
            .map_err(|err| StratumError::invalid_params(err.to_string()))?;

        // The first parameter is the client username, which is ignored.

        if submit.extranonce2.len() != EXTRANONCE2_SIZE {
            return Err(StratumError::invalid_params(format!(
                "extranonce2 is wrong length (received {} bytes; expected {} bytes)",
                submit.extranonce2.len(),
                EXTRANONCE2_SIZE
            )));
        }

        if let Some(job_id) = submit.job.strip_prefix(':') {
            let Some((chain, work)) = second_stages.get(job_id).cloned() else {
                debug!(
                    "Received completed share for unknown second stage work: {}",
                    submit.job
                );
                client.send_work = true;
                return Ok(json!(false));
            };

            let version = match submit.version_bits {
                Some(bits) => Version::from(work.version).rolled(client.version_rolling_mask, bits),
                None => Version::from(work.version),
            };

            let submission = verifier::Submission {
                extranonce2: submit.extranonce2.as_bytes().to_vec(),
                time: submit.ntime.into(),
                nonce: submit.nonce.into(),
                version: version.into(),
            };

            verifier::submit_second_stage(client, chain, &work, &submission, &*self.mergemine);

            Ok(json!(true))
        } else {
            let (job_part, mmroot_part) = match submit.job.split_once(':') {
                Some((job, root)) => (job, Some(root)),
                None => (submit.job.as_str(), None),
            };

            let job_id = job_part.parse::<JobId>().map_err(|err| {
                StratumError::invalid_params(format!("invalid job_id: {err}"))
            })?;

            let mmroot = match mmroot_part {
                Some(root) => root
                    .parse::<MerkleNode>()
                    .map_err(|err| StratumError::invalid_params(format!("invalid mmroot: {err}")))?
                    .to_raw_hash(),
                None => sha256d::Hash::all_zeros(),
            };

            let Some(template) = templates.get(&job_id) else {
                debug!("Received completed share for unknown job_id: {job_id}");
                client.send_work = true;
                return Ok(json!(false));
            };

            let version = match submit.version_bits {
                Some(bits) => Version::from(template.block.header.version)
                    .rolled(client.version_rolling_mask, bits),
                None => Version::from(template.block.header.version),
            };

            let submission = verifier::Submission {
                extranonce2: submit.extranonce2.as_bytes().to_vec(),
                time: submit.ntime.into(),
                nonce: submit.nonce.into(),
                version: version.into(),
            };

            verifier::submit_block(
                client,
                job_id,
                mmroot,
                &template,
                &submission,
                &*self.node,
                &*self.mergemine,
            )?;

            Ok(json!(true))
        }
    }

    fn extranonce_subscribe(
        client: &mut StratumClient,
        params: Value,
    ) -> Result<Value, StratumError> {
        bound_params("mining.extranonce.subscribe", &params, 0, 0)?;

        client.supports_extranonce = true;

        Ok(json!(true))
    }

    /// Watch for new blocks and mempool movement; push updated work.
    async fn watcher(
        self: Arc<Self>,
        mut tip_rx: watch::Receiver<BlockHash>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(WATCHER_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut transactions_updated_last = self.node.transactions_updated();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Attempt to re-establish any dropped connections.
                    self.mergemine.reconnect();

                    // Timeout: check whether the mempool was updated.
                    let transactions_updated_next = self.node.transactions_updated();
                    if transactions_updated_last == transactions_updated_next {
                        continue;
                    }
                    transactions_updated_last = transactions_updated_next;
                }
                changed = tip_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.mergemine.reconnect();
                }
            }

            self.broadcast_work().await;
        }
    }

    /// Send updated work to every authorized client that needs it.
    pub async fn broadcast_work(&self) {
        let mut guard = self.state.lock().await;
        let ServerState {
            templates,
            second_stages,
            clients,
            ..
        } = &mut *guard;

        let tip = self.node.tip();
        let mut dead = Vec::new();

        for (connection_id, handle) in clients.iter_mut() {
            let client = &mut handle.client;

            // Ignore clients that aren't authorized yet.
            if !client.authorized {
                continue;
            }

            // Ignore clients already working on the current second-stage
            // unit.
            let hint = client.last_second_stage.map(|(chain, _)| chain);
            let second_stage = self.mergemine.get_second_stage_work(hint);
            if let Some((chain, work)) = &second_stage {
                if client.last_second_stage == Some((*chain, work.prev_block)) {
                    continue;
                }
            }

            // Ignore clients already working on the new block. Typically
            // that is just the miner who found it, who was sent an update
            // the moment their submission was accepted.
            if second_stage.is_none() {
                let mmwork = self.mergemine.get_merge_mine_work(&client.mmauth);
                let mmroot = work::aux_work_merkle_root(&mmwork)
                    .unwrap_or_else(|_| sha256d::Hash::all_zeros());
                if client.last_tip == Some(tip) && client.mmwork.contains_key(&mmroot) {
                    continue;
                }
            }

            let lines = match work::generate(
                templates,
                second_stages,
                client,
                &*self.node,
                &*self.mergemine,
            ) {
                Ok(lines) => lines,
                Err(error) => {
                    debug!("Error generating updated work for stratum client: {error}");
                    vec![Message::error(Id::Null, &error).to_line()]
                }
            };

            for line in lines {
                if handle.outbound.send(line).is_err() {
                    dead.push(*connection_id);
                    break;
                }
            }
        }

        // The event path removes its own entry; here removal is deferred
        // until after the iteration.
        for connection_id in dead {
            clients.remove(&connection_id);
        }
    }
}

fn parse_request(line: &str) -> Result<Option<(Id, String, Value)>, StratumError> {
    let value: Value = serde_json::from_str(line).map_err(|_| StratumError::Parse)?;

    if !value.is_object() {
        return Err(StratumError::NotAnObject);
    }

    // A JSON-RPC reply; the caller ignores it.
    if value.get("result").is_some() || value.get("error").is_some() {
        return Ok(None);
    }

    let id = match value.get("id") {
        Some(id) => serde_json::from_value(id.clone()).map_err(|_| StratumError::Parse)?,
        None => Id::Null,
    };

    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or(StratumError::Parse)?
        .to_string();

    let params = value
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    Ok(Some((id, method, params)))
}

fn bound_params(method: &str, params: &Value, min: usize, max: usize) -> Result<(), StratumError> {
    let len = params
        .as_array()
        .map(Vec::len)
        .ok_or_else(|| StratumError::invalid_params(format!("{method} params must be an array")))?;

    if len < min {
        return Err(StratumError::invalid_params(format!(
            "{method} expects at least {min} parameters; received {len}"
        )));
    }

    if len > max {
        return Err(StratumError::invalid_params(format!(
            "{method} receives no more than {max} parameters; got {len}"
        )));
    }

    Ok(())
}
