//! KVS key layout for per-CR data. Every key is namespaced under
//! `hadron:cr:{id}:…` so a CR's footprint can be inspected at a glance.

pub fn stream(cr_id: &str) -> String {
    format!("hadron:cr:{cr_id}:events")
}

pub fn notify(cr_id: &str) -> String {
    format!("hadron:cr:{cr_id}:events:notify")
}

pub fn intervention(cr_id: &str) -> String {
    format!("hadron:cr:{cr_id}:intervention")
}

pub fn nudge(cr_id: &str, role: &str) -> String {
    format!("hadron:cr:{cr_id}:nudge:{role}")
}

pub fn resume_overrides(cr_id: &str) -> String {
    format!("hadron:cr:{cr_id}:resume_overrides")
}

pub fn worker_log(cr_id: &str) -> String {
    format!("hadron:cr:{cr_id}:worker_log")
}

pub fn conversation(cr_id: &str, role: &str, repo: &str, unix_ts: i64) -> String {
    format!("hadron:cr:{cr_id}:conv:{role}:{repo}:{unix_ts}")
}

/// Prefix a conversation key must carry to be served for this CR.
pub fn conversation_prefix(cr_id: &str) -> String {
    format!("hadron:cr:{cr_id}:conv:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_cr() {
        assert_eq!(stream("CR-1"), "hadron:cr:CR-1:events");
        assert_eq!(notify("CR-1"), "hadron:cr:CR-1:events:notify");
        assert_eq!(nudge("CR-1", "code_writer"), "hadron:cr:CR-1:nudge:code_writer");
        assert!(conversation("CR-1", "spec_writer", "repo", 7)
            .starts_with(&conversation_prefix("CR-1")));
    }
}
