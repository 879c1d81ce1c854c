use std::{fs, io, path::Path, time::Duration};

pub const NET_CONNECT_TIMEOUT: Duration = Duration::from_millis(8 * 1000);

pub const NET_IO_TIMEOUT: Duration = Duration::from_millis(16 * 1000);

pub fn default_ureq_agent_builder(
    proxy_url: Option<&str>,
) -> ureq::config::ConfigBuilder<ureq::typestate::AgentScope> {
    // Error statuses are handled by inspecting the response, uploads can
    // outlive any sensible global deadline, hence no `timeout_global` here.
    let mut agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_connect(Some(NET_CONNECT_TIMEOUT))
        .timeout_recv_response(Some(NET_IO_TIMEOUT))
        .timeout_send_request(Some(NET_IO_TIMEOUT));

    if let Some(proxy_url) = proxy_url {
        let proxy = ureq::Proxy::new(proxy_url).ok();
        agent = agent.proxy(proxy);
    }

    agent
}

pub fn mkdir_if_not_exists(path: &Path) -> io::Result<()> {
    // On a first run the platform config parent may not exist either.
    fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_directories_are_created_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Sotto").join("config");

        mkdir_if_not_exists(&nested).unwrap();
        assert!(nested.is_dir());

        mkdir_if_not_exists(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
