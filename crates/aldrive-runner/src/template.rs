use aldrive_core::config::Config;
use aldrive_core::constants::env;
use aldrive_core::model::{CycleIndex, Stage};
use std::collections::BTreeMap;
use std::path::Path;

/// Values substituted into stage command templates and exported to the
/// command environment.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

impl TemplateVars {
    pub fn for_stage(config: &Config, cycle: CycleIndex, stage: Stage) -> Self {
        let mut values = BTreeMap::new();
        values.insert("cycle", cycle.to_string());
        values.insert("cases", config.cases.to_string());
        values.insert("stage", stage.key().to_string());
        values.insert("cycle_dir", path_str(&config.cycle_dir(cycle)));
        values.insert("working_dir", path_str(&config.working_dir));
        if let Some(prev) = cycle.previous() {
            values.insert("prev_cycle", prev.to_string());
            values.insert("prev_cycle_dir", path_str(&config.cycle_dir(prev)));
        }
        if let Some(seed) = &config.seed_dir {
            values.insert("seed_dir", path_str(seed));
        }
        Self { values }
    }

    pub fn with_case(&self, case: u32) -> Self {
        let mut next = self.clone();
        next.values.insert("case", case.to_string());
        next
    }

    pub fn with_unit(&self, round: u32, unit: &str) -> Self {
        let mut next = self.clone();
        next.values.insert("round", round.to_string());
        next.values.insert("unit", unit.to_string());
        next
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replaces `{name}` for every known name. Anything else in braces,
    /// such as shell `${VAR}`, is copied through untouched.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => match self.values.get(&after[..close]) {
                    Some(value) => {
                        out.push_str(value);
                        rest = &after[close + 1..];
                    }
                    None => {
                        out.push('{');
                        rest = after;
                    }
                },
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn env(&self) -> Vec<(&'static str, String)> {
        [
            (env::CYCLE, "cycle"),
            (env::CASE, "case"),
            (env::STAGE, "stage"),
            (env::CYCLE_DIR, "cycle_dir"),
            (env::PREV_CYCLE_DIR, "prev_cycle_dir"),
            (env::WORKING_DIR, "working_dir"),
            (env::SEED_DIR, "seed_dir"),
        ]
        .into_iter()
        .filter_map(|(var, key)| self.get(key).map(|v| (var, v.to_string())))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> Config {
        let mut c = Config::from_toml_str("cases = 3\nseed_dir = \"seed\"\n").unwrap();
        c.resolve_paths(&PathBuf::from("/runs")).unwrap();
        c
    }

    #[test]
    fn test_render_known_keys() {
        let vars = TemplateVars::for_stage(&config(), CycleIndex(2), Stage::RunMd).with_case(1);
        assert_eq!(
            vars.render("md --in {prev_cycle_dir}/params.txt --case {case} of {cases}"),
            "md --in /runs/./ALC-1/params.txt --case 1 of 3"
        );
        assert_eq!(vars.render("{stage}@{cycle}"), "run-md@2");
    }

    #[test]
    fn test_render_leaves_unknown_braces() {
        let vars = TemplateVars::for_stage(&config(), CycleIndex(0), Stage::BuildMatrix);
        assert_eq!(
            vars.render("echo ${HOME} {unit} {cycle} {"),
            "echo ${HOME} {unit} 0 {"
        );
        assert_eq!(vars.render("awk '{print $1}'"), "awk '{print $1}'");
    }

    #[test]
    fn test_seed_cycle_has_no_previous() {
        let vars = TemplateVars::for_stage(&config(), CycleIndex(0), Stage::BuildMatrix);
        assert_eq!(vars.get("prev_cycle"), None);
        assert_eq!(vars.get("seed_dir"), Some("/runs/seed"));
        let env: Vec<&str> = vars.env().iter().map(|(k, _)| *k).collect();
        assert!(env.contains(&"ALC_SEED_DIR"));
        assert!(!env.contains(&"ALC_PREV_CYCLE_DIR"));
        assert!(!env.contains(&"ALC_CASE"));
    }

    #[test]
    fn test_unit_values() {
        let vars = TemplateVars::for_stage(&config(), CycleIndex(4), Stage::CollectReference)
            .with_unit(2, "VASP-3");
        assert_eq!(vars.render("restart {unit} r{round}"), "restart VASP-3 r2");
    }
}
