use std::{path::PathBuf, sync::Arc, time::Duration};

use crossbeam_channel::{unbounded, Receiver, Sender};

use sotto_core::{
    data::{Nav, Playlist, Track},
    error::Error,
    fetch::{self, FetchScope},
    oauth,
    promise::Promise,
    route::{RouteDecision, RouteGuard},
    session::{AuthEvent, SessionStore},
    webapi::Client,
};

const OAUTH_REDIRECT_PORT: u16 = 8585;
const OAUTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Everything the shell's main loop reacts to: stdin lines, session-change
/// notifications forwarded from the client, and completions of background
/// fetches.  Fetch completions carry the request sequence they were started
/// with; the view promise discards the ones a later navigation superseded.
pub enum ShellEvent {
    Input(String),
    InputClosed,
    SessionChanged(AuthEvent),
    TracksLoaded(u64, Result<Vec<Track>, Error>),
    PlaylistsLoaded(u64, Result<Vec<Playlist>, Error>),
    UploadFinished(u64, Result<Track, Error>),
}

enum Command {
    Home,
    Library,
    Search(String),
    Login { email: String, password: String },
    LoginProvider(String),
    Signup { email: String, password: String },
    Logout,
    NewPlaylist(String),
    RenamePlaylist(usize, String),
    Upload { path: PathBuf, title: String, artist: String },
    Open(usize),
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Option<Command>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest = |prefix: &str| line[line.find(prefix).unwrap() + prefix.len()..].trim();
        let command = match verb {
            "home" => Command::Home,
            "library" => Command::Library,
            "search" => {
                let query = rest("search");
                if query.is_empty() {
                    return Err("usage: search <query>".to_string());
                }
                Command::Search(query.to_string())
            }
            "login" => match (words.next(), words.next()) {
                (Some(email), Some(password)) => Command::Login {
                    email: email.to_string(),
                    password: password.to_string(),
                },
                (Some(provider), None) => Command::LoginProvider(provider.to_string()),
                _ => return Err("usage: login <email> <password> | login <provider>".to_string()),
            },
            "signup" => match (words.next(), words.next()) {
                (Some(email), Some(password)) => Command::Signup {
                    email: email.to_string(),
                    password: password.to_string(),
                },
                _ => return Err("usage: signup <email> <password>".to_string()),
            },
            "logout" => Command::Logout,
            "new" => {
                let name = rest("new");
                if name.is_empty() {
                    return Err("usage: new <name>".to_string());
                }
                Command::NewPlaylist(name.to_string())
            }
            "rename" => {
                let index = words
                    .next()
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| "usage: rename <n> <name>".to_string())?;
                let name = words.collect::<Vec<_>>().join(" ");
                if name.is_empty() {
                    return Err("usage: rename <n> <name>".to_string());
                }
                Command::RenamePlaylist(index, name)
            }
            "upload" => match (words.next(), words.next(), words.next()) {
                (Some(path), Some(title), Some(artist)) => Command::Upload {
                    path: PathBuf::from(path),
                    title: title.to_string(),
                    artist: artist.to_string(),
                },
                _ => return Err("usage: upload <path> <title> <artist>".to_string()),
            },
            "open" => {
                let index = words
                    .next()
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| "usage: open <n>".to_string())?;
                Command::Open(index)
            }
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command: {other} (try `help`)")),
        };
        Ok(Some(command))
    }
}

/// The view hierarchy, flattened into a prompt.  One view is current at a
/// time; entering a view starts a background fetch scoped to it, and
/// navigating away disposes the scope so late completions are dropped.
pub struct Shell {
    client: Arc<Client>,
    store: SessionStore,
    guard: RouteGuard,
    sender: Sender<ShellEvent>,
    receiver: Receiver<ShellEvent>,
    nav: Nav,
    scope: FetchScope,
    request_seq: u64,
    tracks: Promise<Vec<Track>, u64>,
    playlists: Promise<Vec<Playlist>, u64>,
    upload: Promise<Track, u64>,
    quit: bool,
}

impl Shell {
    pub fn new(client: Arc<Client>, store: SessionStore, guard: RouteGuard) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            client,
            store,
            guard,
            sender,
            receiver,
            nav: Nav::Home,
            scope: FetchScope::new(),
            request_seq: 0,
            tracks: Promise::Empty,
            playlists: Promise::Empty,
            upload: Promise::Empty,
            quit: false,
        }
    }

    pub fn sender(&self) -> Sender<ShellEvent> {
        self.sender.clone()
    }

    pub fn receiver(&self) -> Receiver<ShellEvent> {
        self.receiver.clone()
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn handle(&mut self, event: ShellEvent) {
        match event {
            ShellEvent::Input(line) => match Command::parse(&line) {
                Ok(Some(command)) => self.run(command),
                Ok(None) => {}
                Err(usage) => println!("{usage}"),
            },
            ShellEvent::InputClosed => {
                self.quit = true;
            }
            ShellEvent::SessionChanged(event) => {
                match event {
                    AuthEvent::SignedIn => match self.store.current() {
                        Some(session) => match &session.user.email {
                            Some(email) => println!("Signed in as {email}."),
                            None => println!("Signed in."),
                        },
                        None => println!("Signed in."),
                    },
                    AuthEvent::SignedOut => println!("Signed out."),
                    AuthEvent::TokenRefreshed => log::debug!("session token refreshed"),
                }
                // The guard may decide differently for the current view now,
                // e.g. the library after a sign-out.
                if !matches!(event, AuthEvent::TokenRefreshed) {
                    self.navigate(self.nav.clone());
                }
            }
            ShellEvent::TracksLoaded(seq, result) => {
                self.tracks.update((seq, result));
                match &self.tracks {
                    Promise::Resolved(tracks) => Self::print_tracks(tracks),
                    Promise::Rejected(err) => println!("Could not load tracks: {err}"),
                    _ => {}
                }
            }
            ShellEvent::PlaylistsLoaded(seq, result) => {
                self.playlists.update((seq, result));
                match &self.playlists {
                    Promise::Resolved(playlists) => Self::print_playlists(playlists),
                    Promise::Rejected(err) => println!("Could not load playlists: {err}"),
                    _ => {}
                }
            }
            ShellEvent::UploadFinished(seq, result) => {
                self.upload.update((seq, result));
                match &self.upload {
                    Promise::Resolved(track) => {
                        println!("Uploaded \"{}\" by {}.", track.title, track.artist);
                        if self.nav == Nav::Library {
                            self.navigate(Nav::Library);
                        }
                    }
                    Promise::Rejected(err) => println!("Upload failed: {err}"),
                    _ => {}
                }
            }
        }
    }

    /// Route the request through the guard and enter whichever view it
    /// settles on.  Entering disposes the previous view's fetch scope, so
    /// results still in flight for it are discarded on arrival.
    pub fn navigate(&mut self, nav: Nav) {
        let target = match self.guard.decide(&nav) {
            RouteDecision::Render(nav) => nav,
            RouteDecision::RedirectToSignIn => {
                println!("You need to sign in first.");
                Nav::SignIn
            }
            RouteDecision::RedirectToHome => Nav::Home,
        };
        self.scope.dispose();
        self.scope = FetchScope::new();
        self.nav = target.clone();
        println!("-- {} --", target.full_title());
        match target {
            Nav::Home => {
                let client = Arc::clone(&self.client);
                self.start_fetch(
                    move || client.list_tracks(),
                    |seq, result| ShellEvent::TracksLoaded(seq, result),
                    |shell, seq| shell.tracks.defer(seq),
                );
            }
            Nav::Library => {
                let client = Arc::clone(&self.client);
                self.start_fetch(
                    move || client.list_playlists(),
                    |seq, result| ShellEvent::PlaylistsLoaded(seq, result),
                    |shell, seq| shell.playlists.defer(seq),
                );
            }
            Nav::SearchResults(query) => {
                let client = Arc::clone(&self.client);
                let query = query.to_string();
                self.start_fetch(
                    move || client.search_tracks(&query),
                    |seq, result| ShellEvent::TracksLoaded(seq, result),
                    |shell, seq| shell.tracks.defer(seq),
                );
            }
            Nav::SignIn => {
                println!("Sign in with `login <email> <password>` or `login <provider>`.");
            }
            Nav::SignUp => {
                println!("Create an account with `signup <email> <password>`.");
            }
        }
    }

    /// Run `work` on a background thread under the current view's scope and
    /// feed the completion back into the event loop, tagged with a fresh
    /// request sequence.
    fn start_fetch<T: Send + 'static>(
        &mut self,
        work: impl FnOnce() -> Result<T, Error> + Send + 'static,
        wrap: impl FnOnce(u64, Result<T, Error>) -> ShellEvent + Send + 'static,
        defer: impl FnOnce(&mut Self, u64),
    ) {
        self.request_seq += 1;
        let seq = self.request_seq;
        defer(self, seq);
        let sender = self.sender.clone();
        fetch::spawn(self.scope.token(), work, move |_, result| {
            let _ = sender.send(wrap(seq, result));
        });
    }

    fn run(&mut self, command: Command) {
        match command {
            Command::Home => self.navigate(Nav::Home),
            Command::Library => self.navigate(Nav::Library),
            Command::Search(query) => self.navigate(Nav::SearchResults(query.into())),
            Command::Login { email, password } => {
                if let Err(err) = self.store.sign_in(&email, &password) {
                    println!("{err}");
                }
            }
            Command::LoginProvider(provider) => {
                println!("Opening the browser for {provider} sign-in...");
                let result = oauth::sign_in_with_provider(
                    &self.client,
                    &provider,
                    OAUTH_REDIRECT_PORT,
                    OAUTH_TIMEOUT,
                    |auth_url| {
                        if open::that(auth_url).is_err() {
                            println!("Open this URL in your browser:\n{auth_url}");
                        }
                    },
                );
                if let Err(err) = result {
                    println!("{err}");
                }
            }
            Command::Signup { email, password } => match self.store.sign_up(&email, &password) {
                Ok(()) if self.store.current().is_none() => {
                    println!("Account created. Check your inbox to confirm the address.");
                }
                Ok(()) => {}
                Err(err) => println!("{err}"),
            },
            Command::Logout => {
                if let Err(err) = self.store.sign_out() {
                    println!("{err}");
                }
            }
            Command::NewPlaylist(name) => match self.client.create_playlist(&name) {
                Ok(playlist) => {
                    println!("Created playlist \"{}\".", playlist.name);
                    if self.nav == Nav::Library {
                        self.navigate(Nav::Library);
                    }
                }
                Err(err) => println!("{err}"),
            },
            Command::RenamePlaylist(index, name) => match self.playlist_at(index) {
                Some(playlist) => match self.client.rename_playlist(&playlist.id, &name) {
                    Ok(renamed) => {
                        println!("Renamed to \"{}\".", renamed.name);
                        if self.nav == Nav::Library {
                            self.navigate(Nav::Library);
                        }
                    }
                    Err(err) => println!("{err}"),
                },
                None => println!("No playlist #{index}; `library` lists them."),
            },
            Command::Upload { path, title, artist } => {
                if !self.store.is_authenticated() {
                    println!("You need to sign in first.");
                    return;
                }
                println!("Uploading {}...", path.display());
                let client = Arc::clone(&self.client);
                self.start_fetch(
                    move || client.upload_track(&title, &artist, &path),
                    |seq, result| ShellEvent::UploadFinished(seq, result),
                    |shell, seq| shell.upload.defer(seq),
                );
            }
            Command::Open(index) => match self.track_at(index) {
                Some(track) => {
                    if let Err(err) = open::that(track.file_url.as_ref()) {
                        println!("Could not open the track: {err}");
                    }
                }
                None => println!("No track #{index}; `home` or `search` list them."),
            },
            Command::Help => Self::print_help(),
            Command::Quit => {
                self.quit = true;
            }
        }
    }

    fn track_at(&self, index: usize) -> Option<&Track> {
        self.tracks
            .resolved()
            .and_then(|tracks| index.checked_sub(1).and_then(|i| tracks.get(i)))
    }

    fn playlist_at(&self, index: usize) -> Option<&Playlist> {
        self.playlists
            .resolved()
            .and_then(|playlists| index.checked_sub(1).and_then(|i| playlists.get(i)))
    }

    fn print_tracks(tracks: &[Track]) {
        if tracks.is_empty() {
            println!("No tracks.");
        }
        for (i, track) in tracks.iter().enumerate() {
            println!("{:3}. {} — {}", i + 1, track.title, track.artist);
        }
    }

    fn print_playlists(playlists: &[Playlist]) {
        if playlists.is_empty() {
            println!("No playlists. Create one with `new <name>`.");
        }
        for (i, playlist) in playlists.iter().enumerate() {
            println!("{:3}. {}", i + 1, playlist.name);
        }
    }

    fn print_help() {
        println!(
            "Commands:\n\
             \x20 home                          all tracks, newest first\n\
             \x20 library                       your playlists\n\
             \x20 search <query>                search tracks by title or artist\n\
             \x20 login <email> <password>      sign in with credentials\n\
             \x20 login <provider>              sign in through a provider (e.g. google)\n\
             \x20 signup <email> <password>     create an account\n\
             \x20 logout                        sign out\n\
             \x20 new <name>                    create a playlist\n\
             \x20 rename <n> <name>             rename the n-th playlist\n\
             \x20 upload <path> <title> <artist>  upload an audio file\n\
             \x20 open <n>                      play the n-th listed track\n\
             \x20 help                          this list\n\
             \x20 quit                          exit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_their_arguments() {
        assert!(matches!(Command::parse("home"), Ok(Some(Command::Home))));
        assert!(matches!(
            Command::parse("search nina simone"),
            Ok(Some(Command::Search(q))) if q == "nina simone"
        ));
        assert!(matches!(
            Command::parse("login a@b.c hunter2"),
            Ok(Some(Command::Login { email, password }))
                if email == "a@b.c" && password == "hunter2"
        ));
        assert!(matches!(
            Command::parse("login google"),
            Ok(Some(Command::LoginProvider(p))) if p == "google"
        ));
        assert!(matches!(
            Command::parse("rename 2 road trip"),
            Ok(Some(Command::RenamePlaylist(2, name))) if name == "road trip"
        ));
        assert!(matches!(
            Command::parse("upload /tmp/a.mp3 Song Artist"),
            Ok(Some(Command::Upload { .. }))
        ));
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert!(matches!(Command::parse(""), Ok(None)));
        assert!(matches!(Command::parse("   "), Ok(None)));
    }

    #[test]
    fn malformed_commands_report_usage() {
        assert!(Command::parse("search").is_err());
        assert!(Command::parse("login").is_err());
        assert!(Command::parse("rename x mix").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }
}
