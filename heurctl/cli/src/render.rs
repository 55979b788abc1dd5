//! Plain-text rendering of client status and notices

use heurctl_core::{ClientStatus, ConnectionStatus, LinkState, Notice, NoticeLevel};

/// Connection indicator text
pub fn indicator(link: &LinkState) -> String {
    match link.status {
        ConnectionStatus::Open => "connected".to_string(),
        ConnectionStatus::Connecting if link.attempt > 0 => {
            format!("connecting… (retry {})", link.attempt)
        }
        ConnectionStatus::Connecting => "connecting…".to_string(),
        ConnectionStatus::Closed if link.attempt > 0 && !link.gave_up => {
            format!("reconnecting… (retry {})", link.attempt)
        }
        ConnectionStatus::Closed => "disconnected".to_string(),
    }
}

pub fn progress(status: &ClientStatus) -> String {
    format!(
        "algorithm {:>5.1}%  sweep {:>5.1}%",
        status.progress.alg, status.progress.param
    )
}

pub fn notice(notice: &Notice) -> String {
    let tag = match notice.level {
        NoticeLevel::Pending => "..",
        NoticeLevel::Success => "ok",
        NoticeLevel::Error => "!!",
        NoticeLevel::Muted => "--",
    };
    format!("[{tag}] {}", notice.message)
}

/// Multi-line status block for the `status` command
pub fn status(status: &ClientStatus) -> String {
    let mut out = format!(
        "link:     {}\njob:      {}\nprogress: {}",
        indicator(&status.link),
        status.session,
        progress(status)
    );
    if let Some(kind) = status.in_flight {
        out.push_str(&format!("\nwaiting:  {kind} ack"));
    }
    match status.config.function() {
        Some(function) => out.push_str(&format!(
            "\nfunction: {} [{}, {}]",
            function.name, function.bounds.0, function.bounds.1
        )),
        None => out.push_str("\nfunction: (none)"),
    }
    out
}

pub fn algorithms(status: &ClientStatus) -> String {
    if status.config.algorithms.is_empty() {
        return "no algorithms known yet".to_string();
    }
    status
        .config
        .algorithms
        .iter()
        .map(|a| {
            let mark = if a.is_used { 'x' } else { ' ' };
            let params: Vec<&str> = a.params.iter().map(|p| p.name()).collect();
            format!("[{mark}] {} ({})", a.name, params.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn functions(status: &ClientStatus) -> String {
    let selected = status.config.function().map(|f| f.name.as_str());
    if status.config.functions.is_empty() {
        return "no functions known yet".to_string();
    }
    status
        .config
        .functions
        .iter()
        .map(|f| {
            let mark = if Some(f.name.as_str()) == selected { '*' } else { ' ' };
            format!("{mark} {}", f.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_indicator() {
        let mut link = LinkState::default();
        assert_eq!(indicator(&link), "connecting…");

        link.status = ConnectionStatus::Closed;
        assert_eq!(indicator(&link), "disconnected");

        link.status = ConnectionStatus::Open;
        assert_eq!(indicator(&link), "connected");

        link.status = ConnectionStatus::Closed;
        link.attempt = 2;
        assert_eq!(indicator(&link), "reconnecting… (retry 2)");

        link.gave_up = true;
        assert_eq!(indicator(&link), "disconnected");
    }

    #[test]
    fn test_progress_line() {
        let mut status = ClientStatus::default();
        status.progress.alg = 42.0;
        assert_eq!(progress(&status), "algorithm  42.0%  sweep   0.0%");
    }
}
