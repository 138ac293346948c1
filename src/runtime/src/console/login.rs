//! Serial console login.
//!
//! ```text
//! Start ─► CheckAlreadyLoggedIn ─┬─► AlreadyLoggedIn                       (done)
//!                                └─► AwaitingLoginPrompt
//!                                      │ "login: "   → send username
//!                                      ▼
//!                                    AwaitingPasswordPrompt
//!                                      │ "Password:" → send password
//!                                      ├─► LoginIncorrect                  (failed)
//!                                      ▼
//!                                    LoggedIn ─► ShellConfigured          (done)
//! ```
//!
//! A login attempt that times out is retried once with a shorter deadline.
//! Rejected credentials are final.

use std::fmt;
use std::time::Duration;

use containerdisks_core::error::{DiskError, Result};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use super::expect::Expecter;

/// Any shell prompt.
const PROMPT: &str = r"(\$ |\# )";
/// Output of `echo $?` after a successful command.
const RET_ZERO: &str = r"\n0\r?\n.*(\$ |\# )";
const PASSWORD_PROMPT: &str = "Password:";
const LOGIN_INCORRECT: &str = "Login incorrect";

/// How often a single prompt may be answered within one attempt.
const MAX_REPLIES: usize = 10;

/// Position of the login automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Start,
    CheckAlreadyLoggedIn,
    AlreadyLoggedIn,
    AwaitingLoginPrompt,
    AwaitingPasswordPrompt,
    LoginIncorrect,
    LoggedIn,
    ShellConfigured,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Deadlines of the individual login phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginTimeouts {
    /// Window for detecting an existing session
    pub probe: Duration,
    /// First login attempt
    pub attempt: Duration,
    /// Second login attempt after a timeout
    pub retry: Duration,
    /// Shell configuration after login
    pub configure: Duration,
}

impl Default for LoginTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(5),
            attempt: Duration::from_secs(120),
            retry: Duration::from_secs(60),
            configure: Duration::from_secs(30),
        }
    }
}

/// Credentials and the prompts they produce.
#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub username: String,
    pub password: String,
    already_logged_in: Regex,
    login_prompt: Regex,
    logged_in: Regex,
}

impl LoginOptions {
    /// Options for logging in as `username` on VM `vm_name`.
    ///
    /// Guests that did not receive a hostname show `localhost` instead of the
    /// VM name; both are accepted.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        vm_name: &str,
    ) -> Result<Self> {
        let username = username.into();
        let user = regex::escape(&username);
        let vm = regex::escape(vm_name);

        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| {
                DiskError::ConsoleError(format!("invalid prompt pattern {}: {}", pattern, e))
            })
        };

        Ok(Self {
            already_logged_in: compile(format!(
                r"(\[{user}@(localhost|{vm}) ~\]\$ |\[root@(localhost|{vm}) {user}\]\# )"
            ))?,
            // A bare "login: " would also match "Last failed login: ..."
            login_prompt: compile(format!(r"(localhost|{vm}) login: "))?,
            logged_in: compile(format!(r"\[{user}@(localhost|{vm}) ~\]\$ "))?,
            username,
            password: password.into(),
        })
    }
}

/// Drives a guest console from a fresh boot to a configured root shell.
pub struct LoginAutomaton<S> {
    expecter: Expecter<S>,
    options: LoginOptions,
    timeouts: LoginTimeouts,
    state: LoginState,
    history: Vec<LoginState>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> LoginAutomaton<S> {
    pub fn new(stream: S, options: LoginOptions) -> Self {
        Self {
            expecter: Expecter::new(stream),
            options,
            timeouts: LoginTimeouts::default(),
            state: LoginState::Start,
            history: vec![LoginState::Start],
        }
    }

    pub fn with_timeouts(mut self, timeouts: LoginTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    /// Every state visited so far, in order.
    pub fn history(&self) -> &[LoginState] {
        &self.history
    }

    pub fn into_inner(self) -> S {
        self.expecter.into_inner()
    }

    /// Run to completion. Returns `AlreadyLoggedIn` or `ShellConfigured`.
    pub async fn run(&mut self) -> Result<LoginState> {
        self.expecter.send("\n").await?;

        if self.probe().await? {
            self.transition(LoginState::AlreadyLoggedIn);
            return Ok(self.state);
        }

        match self.attempt(self.timeouts.attempt).await {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                tracing::warn!(
                    user = %self.options.username,
                    error = %e,
                    "Login attempt failed, retrying"
                );
                self.attempt(self.timeouts.retry).await.map_err(|e| {
                    tracing::error!(error = %e, "Retried login attempt failed");
                    e
                })?;
            }
            Err(e) => return Err(e),
        }

        self.configure_shell().await?;
        self.transition(LoginState::ShellConfigured);
        Ok(self.state)
    }

    fn transition(&mut self, next: LoginState) {
        tracing::debug!(from = %self.state, to = %next, "Login state change");
        self.state = next;
        self.history.push(next);
    }

    /// Whether a session is already open.
    async fn probe(&mut self) -> Result<bool> {
        self.transition(LoginState::CheckAlreadyLoggedIn);
        self.expecter.send("\n").await?;

        let pattern = self.options.already_logged_in.clone();
        match self.expecter.expect(&pattern, self.timeouts.probe).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_timeout() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// One bounded login attempt ending in a root shell.
    async fn attempt(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        self.transition(LoginState::AwaitingLoginPrompt);
        self.expecter.send("\n").await?;
        self.expecter.send("\n").await?;

        let login_prompt = self.options.login_prompt.clone();
        let password_prompt = fixed(PASSWORD_PROMPT)?;
        let incorrect = fixed(LOGIN_INCORRECT)?;
        let logged_in = self.options.logged_in.clone();
        let cases = [&login_prompt, &password_prompt, &incorrect, &logged_in];
        let mut replies = [0usize; 2];

        loop {
            let (case, _) = self.expecter.expect_any_until(&cases, deadline).await?;
            match case {
                0 | 1 => {
                    replies[case] += 1;
                    if replies[case] > MAX_REPLIES {
                        return Err(DiskError::ConsoleError(format!(
                            "prompt {} repeated more than {} times",
                            cases[case], MAX_REPLIES
                        )));
                    }
                    if case == 0 {
                        let username = format!("{}\n", self.options.username);
                        self.expecter.send(&username).await?;
                        self.transition(LoginState::AwaitingPasswordPrompt);
                    } else {
                        let password = format!("{}\n", self.options.password);
                        self.expecter.send(&password).await?;
                    }
                }
                2 => {
                    self.transition(LoginState::LoginIncorrect);
                    return Err(DiskError::LoginIncorrect(format!(
                        "guest rejected the password of {}",
                        self.options.username
                    )));
                }
                _ => break,
            }
        }

        self.transition(LoginState::LoggedIn);
        self.expecter.send("sudo su\n").await?;
        self.expecter
            .expect_any_until(&[&fixed(PROMPT)?], deadline)
            .await?;
        Ok(())
    }

    /// Widen the terminal and silence kernel messages on the console.
    async fn configure_shell(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.timeouts.configure;
        let prompt = fixed(PROMPT)?;
        let ret_zero = fixed(RET_ZERO)?;

        for command in ["stty cols 500 rows 500\n", "dmesg -n 1\n"] {
            self.expecter.send(command).await?;
            self.expecter.expect_any_until(&[&prompt], deadline).await?;
            self.expecter.send("echo $?\n").await?;
            self.expecter
                .expect_any_until(&[&ret_zero], deadline)
                .await
                .map_err(|e| match e {
                    DiskError::TimeoutError(_) => DiskError::ConsoleError(format!(
                        "{} did not succeed",
                        command.trim_end()
                    )),
                    other => other,
                })?;
        }
        Ok(())
    }
}

fn fixed(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| DiskError::ConsoleError(format!("invalid pattern {}: {}", pattern, e)))
}
