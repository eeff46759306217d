use aldrive_core::config::{JobResources, StageSettings};

/// Scheduler-neutral resource request for one batch job.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchDirectives {
    pub nodes: Option<u32>,
    pub ppn: Option<u32>,
    pub walltime: Option<String>,
    pub queue: Option<String>,
    pub account: Option<String>,
    pub email: Option<String>,
    pub extra_opts: Vec<String>,
}

impl From<&JobResources> for BatchDirectives {
    fn from(r: &JobResources) -> Self {
        Self {
            nodes: r.nodes,
            ppn: r.ppn,
            walltime: r.walltime.clone(),
            queue: r.queue.clone(),
            account: r.account.clone(),
            email: r.email.clone(),
            extra_opts: r.extra_opts.clone(),
        }
    }
}

impl BatchDirectives {
    pub fn to_sbatch_args(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if let Some(n) = self.nodes {
            opts.push(format!("--nodes={}", n));
        }
        if let Some(p) = self.ppn {
            opts.push(format!("--ntasks-per-node={}", p));
        }
        if let Some(t) = &self.walltime {
            opts.push(format!("--time={}", t));
        }
        if let Some(q) = &self.queue {
            opts.push(format!("--partition={}", q));
        }
        if let Some(a) = &self.account {
            opts.push(format!("--account={}", a));
        }
        if let Some(e) = &self.email {
            opts.push(format!("--mail-user={}", e));
            opts.push("--mail-type=END,FAIL".to_string());
        }
        opts.extend(self.extra_opts.clone());
        opts
    }

    pub fn to_qsub_args(&self) -> Vec<String> {
        let mut opts = Vec::new();
        match (self.nodes, self.ppn) {
            (Some(n), Some(p)) => opts.extend(["-l".to_string(), format!("nodes={}:ppn={}", n, p)]),
            (Some(n), None) => opts.extend(["-l".to_string(), format!("nodes={}", n)]),
            (None, Some(p)) => opts.extend(["-l".to_string(), format!("nodes=1:ppn={}", p)]),
            (None, None) => {}
        }
        if let Some(t) = &self.walltime {
            opts.extend(["-l".to_string(), format!("walltime={}", t)]);
        }
        if let Some(q) = &self.queue {
            opts.extend(["-q".to_string(), q.clone()]);
        }
        if let Some(a) = &self.account {
            opts.extend(["-A".to_string(), a.clone()]);
        }
        if let Some(e) = &self.email {
            opts.extend(["-M".to_string(), e.clone(), "-m".to_string(), "ae".to_string()]);
        }
        opts.extend(self.extra_opts.clone());
        opts
    }
}

pub fn resolve_for_stage(settings: &StageSettings) -> BatchDirectives {
    let directives = BatchDirectives::from(&settings.resources);
    tracing::debug!(
        "Resolved batch directives for stage '{}' ({} variant): {:?}",
        settings.stage.key(),
        settings.variant,
        directives
    );
    directives
}
