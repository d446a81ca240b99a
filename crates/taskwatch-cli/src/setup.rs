//! First-run setup: log in once, then write a fresh state file.

use std::io::IsTerminal;

use anyhow::{Context, bail};
use clap::{Args, Parser};
use dialoguer::{Confirm, Input, Password};
use taskwatch_store::{AccountCredentials, NotifyChannel, PersistedState, StateStore};
use taskwatch_sync::SessionManager;
use tracing::info;

/// Anything not given here or in the environment is asked for interactively.
#[derive(Debug, Default, Args)]
pub struct SetupArgs {
    /// Account name on the task platform.
    #[arg(long, env = "TASKWATCH_USERNAME")]
    pub username: Option<String>,
    /// Account password.
    #[arg(long, env = "TASKWATCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Push relay token.
    #[arg(long, env = "TASKWATCH_RELAY_TOKEN", hide_env_values = true)]
    pub relay_token: Option<String>,
    /// Push relay group code. Leave empty to notify only the token owner.
    #[arg(long, env = "TASKWATCH_TOPIC")]
    pub topic: Option<String>,
    /// Keep only the refresh token; the watcher then cannot log in again on its own.
    #[arg(long)]
    pub forget_password: bool,
    /// Overwrite an existing, valid state file without asking.
    #[arg(long)]
    pub force: bool,
}

/// Setup options for a run that found no usable state: no command line of
/// its own, so only the environment fills them in.
#[derive(Parser)]
#[command(name = "taskwatch")]
struct EnvSetup {
    #[command(flatten)]
    args: SetupArgs,
}

impl SetupArgs {
    pub fn from_env() -> anyhow::Result<Self> {
        let parsed = EnvSetup::try_parse_from(["taskwatch"]).context("reading setup environment")?;
        Ok(parsed.args)
    }
}

/// Prompting needs someone at the keyboard.
fn require_terminal(what: &str, hint: &str) -> anyhow::Result<()> {
    if !std::io::stdin().is_terminal() {
        bail!("no {what} given and no terminal to ask on; set {hint}");
    }
    Ok(())
}

/// Collect credentials, perform the initial login and save the new state.
pub async fn run_setup(
    args: SetupArgs,
    store: &mut StateStore,
    sessions: &SessionManager,
) -> anyhow::Result<PersistedState> {
    if !args.force && store.load().is_ok() {
        let overwrite = Confirm::new()
            .with_prompt(format!(
                "{} already holds a valid setup. Overwrite it?",
                store.path().display()
            ))
            .default(false)
            .interact()?;
        if !overwrite {
            bail!("setup cancelled, existing state kept");
        }
    }

    println!("First-run setup");
    let username = match args.username {
        Some(u) => u,
        None => {
            require_terminal("account", "--username or TASKWATCH_USERNAME")?;
            Input::<String>::new().with_prompt("Account").interact_text()?
        }
    };
    let password = match args.password {
        Some(p) => p,
        None => {
            require_terminal("password", "TASKWATCH_PASSWORD")?;
            Password::new().with_prompt("Password").interact()?
        }
    };
    let relay_token = match args.relay_token {
        Some(t) => t,
        None => {
            require_terminal("relay token", "TASKWATCH_RELAY_TOKEN")?;
            Input::<String>::new()
                .with_prompt("Push relay token")
                .interact_text()?
        }
    };
    // Without a terminal an unset topic just means no group.
    let topic = match args.topic {
        Some(t) => t,
        None if !std::io::stdin().is_terminal() => String::new(),
        None => Input::<String>::new()
            .with_prompt("Push relay group code (optional)")
            .allow_empty(true)
            .interact_text()?,
    };

    let account = AccountCredentials { username, password };
    let refresh = sessions
        .login(&account)
        .await
        .context("initial login failed")?;

    let account = (!args.forget_password).then_some(account);
    let state = PersistedState::new(refresh, account, NotifyChannel::new(relay_token, topic));
    store.save(&state).context("writing state file")?;
    info!(path = %store.path().display(), "setup complete");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn environment_fills_setup_args() {
        // No other test reads these variables.
        unsafe {
            std::env::set_var("TASKWATCH_PASSWORD", "s3cret");
            std::env::set_var("TASKWATCH_RELAY_TOKEN", "relay-tok");
        }
        let args = SetupArgs::from_env().unwrap();
        unsafe {
            std::env::remove_var("TASKWATCH_PASSWORD");
            std::env::remove_var("TASKWATCH_RELAY_TOKEN");
        }
        assert_eq!(args.password.as_deref(), Some("s3cret"));
        assert_eq!(args.relay_token.as_deref(), Some("relay-tok"));
        assert!(!args.force);
        assert!(!args.forget_password);
    }

    #[tokio::test]
    async fn complete_args_log_in_without_prompting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/user/token"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("password=pw"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "refresh": "r-1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let mut store = StateStore::new(dir.path().join("config.json"));
        let client = taskwatch_sync::build_client(Duration::from_secs(5)).unwrap();
        let sessions = SessionManager::new(client, &format!("{}/api/v1", server.uri()));
        let args = SetupArgs {
            username: Some("alice".into()),
            password: Some("pw".into()),
            relay_token: Some("relay-tok".into()),
            topic: Some("grp".into()),
            forget_password: true,
            force: false,
        };

        let state = run_setup(args, &mut store, &sessions).await.unwrap();
        assert_eq!(state.refresh_token, "r-1");
        assert!(state.account.is_none());

        let saved = store.load().unwrap();
        assert_eq!(saved.refresh_token, "r-1");
        assert_eq!(saved.channel.token, "relay-tok");
        assert_eq!(saved.channel.topic, "grp");
    }
}
