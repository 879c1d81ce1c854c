mod shell;

use std::{env, io, io::BufRead, path::PathBuf, process, sync::Arc, thread};

use env_logger::{Builder, Env};
use parking_lot::Mutex;

use sotto_core::{
    config::Config, data::Nav, route::RouteGuard, session::SessionStore, webapi::Client,
};

use crate::shell::{Shell, ShellEvent};

const ENV_LOG: &str = "SOTTO_LOG";
const ENV_LOG_STYLE: &str = "SOTTO_LOG_STYLE";
const ENV_BACKEND_URL: &str = "SOTTO_BACKEND_URL";
const ENV_ANON_KEY: &str = "SOTTO_ANON_KEY";

fn main() {
    // Setup logging from the env variables, with defaults.
    Builder::from_env(
        Env::new()
            .filter_or(ENV_LOG, "info")
            .write_style(ENV_LOG_STYLE),
    )
    .init();

    let mut config = Config::load().unwrap_or_default();
    if !config.has_backend() {
        if let (Ok(backend_url), Ok(anon_key)) = (env::var(ENV_BACKEND_URL), env::var(ENV_ANON_KEY))
        {
            config.backend_url = backend_url;
            config.anon_key = anon_key;
            config.save();
        } else {
            let config_path = Config::config_dir()
                .map(|dir| dir.join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"));
            eprintln!("No backend configured.");
            eprintln!(
                "Set {ENV_BACKEND_URL} and {ENV_ANON_KEY} in the environment, or fill in \
                 backend_url and anon_key in {}.",
                config_path.display()
            );
            process::exit(1);
        }
    }

    let client = match Client::new(&config) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    };
    let store = SessionStore::new(client.clone());
    let guard = RouteGuard::new(store.clone());
    let shell = Shell::new(Arc::clone(&client), store.clone(), guard);

    // Keep the configuration file in sync with the latest session, the way a
    // browser client keeps it in local storage, and hand the event to the
    // shell so the route guard re-evaluates the current view.
    let subscription = client.on_session_change(Box::new({
        let config = Mutex::new(config);
        let sender = shell.sender();
        move |event, session| {
            let mut config = config.lock();
            config.session = session.cloned();
            config.save();
            let _ = sender.send(ShellEvent::SessionChanged(event));
        }
    }));
    store.initialize();

    thread::spawn({
        let sender = shell.sender();
        move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if sender.send(ShellEvent::Input(line)).is_err() {
                            return;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = sender.send(ShellEvent::InputClosed);
        }
    });

    println!("Sotto. Type `help` for the command list.");
    if let Some(session) = store.wait_for_bootstrap() {
        match &session.user.email {
            Some(email) => println!("Signed in as {email}."),
            None => println!("Signed in."),
        }
    }

    let mut shell = shell;
    shell.navigate(Nav::Home);
    for event in shell.receiver() {
        shell.handle(event);
        if shell.should_quit() {
            break;
        }
    }

    subscription.unsubscribe();
    store.teardown();
}
