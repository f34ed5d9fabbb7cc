use super::*;

/// An immutable, fully assembled work unit. Customization (payout,
/// extranonce, commitments) always operates on copies of its transactions.
#[derive(Debug, Clone)]
pub struct WorkTemplate {
    pub job_id: JobId,
    pub block: Block,
    /// Precomputed only when witness is not enabled; a witness-enabled
    /// coinbase mutates on every customization, so the branch is rebuilt
    /// each time instead.
    pub cb_branch: Vec<sha256d::Hash>,
    pub is_witness_enabled: bool,
    pub has_block_final_tx: bool,
    pub height: u64,
    pub tip: BlockHash,
}

impl WorkTemplate {
    pub fn new(candidate: BlockCandidate, tip: BlockHash, is_witness_enabled: bool) -> Self {
        let BlockCandidate {
            mut block,
            height,
            has_block_final_tx,
        } = candidate;

        // So that the block hash, and with it the job id, is well defined.
        if let Some(root) = block.compute_merkle_root() {
            block.header.merkle_root = root;
        }

        let job_id = JobId::from(block.block_hash());

        let cb_branch = if is_witness_enabled {
            Vec::new()
        } else {
            merkle::coinbase_branch(&block)
        };

        Self {
            job_id,
            block,
            cb_branch,
            is_witness_enabled,
            has_block_final_tx,
            height,
            tip,
        }
    }
}

/// The bounded job_id → template map, refreshed on tip or mempool movement.
pub struct TemplateStore {
    templates: HashMap<JobId, Arc<WorkTemplate>>,
    current: Option<JobId>,
    tip: Option<BlockHash>,
    transactions_updated: u64,
    last_refresh: u64,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
            current: None,
            tip: None,
            transactions_updated: 0,
            last_refresh: 0,
        }
    }

    pub fn get(&self, job_id: &JobId) -> Option<Arc<WorkTemplate>> {
        self.templates.get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&mut self) {
        self.templates.clear();
        self.current = None;
    }

    /// Return the current template, rebuilding first if the tip moved, the
    /// mempool advanced (rate limited), or the current entry is gone.
    pub fn maybe_refresh(
        &mut self,
        node: &dyn Node,
        now: u64,
    ) -> Result<(Arc<WorkTemplate>, bool), StratumError> {
        let tip = node.tip();
        let transactions_updated = node.transactions_updated();

        let current = self
            .current
            .and_then(|job_id| self.templates.get(&job_id).cloned());

        let fresh = match &current {
            Some(_) => {
                self.tip == Some(tip)
                    && (transactions_updated == self.transactions_updated
                        || now.saturating_sub(self.last_refresh) <= WORK_REFRESH_HOLDOFF_SECS)
            }
            None => false,
        };

        if fresh {
            return Ok((current.expect("checked above"), false));
        }

        let candidate = node
            .create_block_candidate()
            .map_err(|err| StratumError::internal(err))?;

        let template = Arc::new(WorkTemplate::new(
            candidate,
            tip,
            node.is_witness_enabled(&tip),
        ));

        let job_id = template.job_id;
        self.templates.insert(job_id, template.clone());
        self.current = Some(job_id);
        self.tip = Some(tip);
        self.transactions_updated = transactions_updated;
        self.last_refresh = now;

        info!(
            "New stratum block template ({} total): {}",
            self.templates.len(),
            job_id
        );

        self.evict(now);

        Ok((template, true))
    }

    /// Drop entries older than the expiry window, then — if still over the
    /// cap — the single oldest entry. The current template is never evicted.
    fn evict(&mut self, now: u64) {
        let cutoff = now.saturating_sub(WORK_EXPIRY_SECS);

        let mut expired = Vec::new();
        let mut oldest: Option<(JobId, u32)> = None;

        for (job_id, template) in &self.templates {
            if Some(*job_id) == self.current {
                continue;
            }

            let ntime = template.block.header.time;

            if u64::from(ntime) < cutoff {
                expired.push(*job_id);
            }

            if oldest.map_or(true, |(_, oldest_time)| ntime <= oldest_time) {
                oldest = Some((*job_id, ntime));
            }
        }

        for job_id in expired {
            self.templates.remove(&job_id);
            debug!(
                "Removed outdated stratum block template ({} total): {}",
                self.templates.len(),
                job_id
            );
        }

        if self.templates.len() > MAX_WORK_TEMPLATES {
            if let Some((job_id, _)) = oldest {
                if self.templates.remove(&job_id).is_some() {
                    debug!(
                        "Removed oldest stratum block template ({} total): {}",
                        self.templates.len(),
                        job_id
                    );
                }
            }
        }
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}
