//! Handing article files to the outside world
//!
//! This module is organized into:
//! - [`Transport`]: the seam the dispatcher and batch sender call through
//! - [`CommandTransport`]: runs a feed's transmit template, or mails the file
//! - [`DryRunTransport`]: logs and records instead of running anything
//! - [`Mailer`] and [`Notifier`]: mail delivery and administrator notices
//!
//! A transmit template may use these escapes:
//!
//! | Escape | Replaced by                                              |
//! |--------|----------------------------------------------------------|
//! | `%F`   | the file being sent                                      |
//! | `%I`   | the article's Message-ID                                 |
//! | `%R`   | the remote receiver command (`rnews`, `cunbatch`, ...)   |
//! | `%U`   | the U option's value, or `-c`, when sending a spool copy |
//! | `%S`   | the target system                                        |

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::feeds::Feed;

/// Subject of articles delivered by mail
pub const MAIL_SUBJECT: &str = "USENET articles";

/// One hand-off of a file to one or more systems
#[derive(Debug, Clone, Copy)]
pub struct TransmitRequest<'a> {
    /// Target systems, comma or space separated
    pub systems: &'a str,
    /// Link the systems are reached over
    pub feed: &'a Feed,
    /// Message-ID of the article, empty for batches
    pub message_id: &'a str,
    /// File to send
    pub file: &'a Path,
    /// The file is the spool copy, so `%U` may tell uux to use it in place
    pub use_existing: bool,
    /// The file is a batch rather than one article
    pub batched: bool,
}

impl<'a> TransmitRequest<'a> {
    /// Create a request for a single article
    pub fn new(systems: &'a str, feed: &'a Feed, message_id: &'a str, file: &'a Path) -> Self {
        Self {
            systems,
            feed,
            message_id,
            file,
            use_existing: false,
            batched: false,
        }
    }

    /// Mark the file as the spool copy
    #[must_use]
    pub fn using_existing(mut self, use_existing: bool) -> Self {
        self.use_existing = use_existing;
        self
    }

    /// Mark the file as a batch
    #[must_use]
    pub fn batched(mut self, batched: bool) -> Self {
        self.batched = batched;
        self
    }

    /// Target systems as a list
    #[must_use]
    pub fn system_list(&self) -> Vec<&'a str> {
        self.systems
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Something that can deliver a file to remote systems
pub trait Transport {
    /// Deliver `request.file` to every system in `request.systems`
    fn transmit(&self, request: &TransmitRequest<'_>) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn transmit(&self, request: &TransmitRequest<'_>) -> Result<()> {
        (**self).transmit(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transmit(&self, request: &TransmitRequest<'_>) -> Result<()> {
        (**self).transmit(request)
    }
}

impl<T: Transport + ?Sized> Transport for Rc<T> {
    fn transmit(&self, request: &TransmitRequest<'_>) -> Result<()> {
        (**self).transmit(request)
    }
}

/// Remote agent that should unpack what we send
///
/// Only receivers flagged as version 2.10 (`V2.10`) need anything other
/// than `rnews`.
///
/// ```
/// use news_relay::Feed;
/// use news_relay::transport::receiver_command;
///
/// let old = Feed::new("bob", "all").with_options("CV2.10");
/// assert_eq!(receiver_command(&old, false), "uncompress");
/// assert_eq!(receiver_command(&old, true), "cunbatch");
/// assert_eq!(receiver_command(&Feed::new("carol", "all"), true), "rnews");
/// ```
#[must_use]
pub fn receiver_command(feed: &Feed, batched: bool) -> &'static str {
    let old_receiver = feed
        .option('V')
        .is_some_and(|version| version.starts_with("2.10"));
    if !old_receiver {
        return "rnews";
    }

    let batched = batched && feed.has_option('F');
    let compress = feed.has_option('C');
    let encode = feed.has_option('E');
    match (batched, compress, encode) {
        (true, true, true) => "c7unbatch",
        (true, true, false) => "cunbatch",
        (true, false, _) => "unbatch",
        (false, true, true) => "un7compress",
        (false, true, false) => "uncompress",
        (false, false, _) => "rnews",
    }
}

/// A transmit template with its escapes filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedCommand {
    /// Command text
    pub command: String,
    /// Whether `%F` put the file name on the command line
    pub names_file: bool,
}

/// Fill in the escapes of a transmit template for one target
///
/// Unknown escapes are copied through unchanged.
///
/// # Arguments
///
/// * `template` - Transmit template
/// * `request` - What is being sent
/// * `receiver` - Remote agent name for `%R`
/// * `system` - Target for `%S`
pub fn expand_template(
    template: &str,
    request: &TransmitRequest<'_>,
    receiver: &str,
    system: &str,
) -> ExpandedCommand {
    let mut command = String::with_capacity(template.len() + 32);
    let mut names_file = false;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            command.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('F') => {
                command.push_str(&request.file.to_string_lossy());
                names_file = true;
            }
            Some('I') => command.push_str(request.message_id),
            Some('R') => command.push_str(receiver),
            Some('U') => {
                if request.use_existing {
                    match request.feed.option('U') {
                        Some(value) if !value.is_empty() => command.push_str(&value),
                        Some(_) => command.push_str("-c"),
                        None => {}
                    }
                }
            }
            Some('S') => command.push_str(system),
            _ => {
                command.push('%');
                continue;
            }
        }
        chars.next();
    }

    ExpandedCommand {
        command,
        names_file,
    }
}

/// Mail address for a system, in the form the user name asks for
///
/// ```
/// use news_relay::transport::mail_address;
///
/// assert_eq!(mail_address("@news", "bob.example.org"), "news@bob.example.org");
/// assert_eq!(mail_address(":news", "bob"), "news:bob");
/// assert_eq!(mail_address("rnews", "bob"), "bob!rnews");
/// ```
#[must_use]
pub fn mail_address(user: &str, system: &str) -> String {
    if let Some(user) = user.strip_prefix('@') {
        format!("{user}@{system}")
    } else if let Some(user) = user.strip_prefix(':') {
        format!("{user}:{system}")
    } else {
        format!("{system}!{user}")
    }
}

/// Prefix every line with `N`, as a mail-fed rnews expects
#[must_use]
pub fn mail_body(content: &str) -> String {
    let mut body = String::with_capacity(content.len() + content.len() / 40 + 1);
    for line in content.lines() {
        body.push('N');
        body.push_str(line);
        body.push('\n');
    }
    body
}

/// Delivery of one mail message
pub trait Mailer {
    /// Send `body` to `to` under `subject`
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

impl<T: Mailer + ?Sized> Mailer for Box<T> {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        (**self).send(to, subject, body)
    }
}

/// Pipes a complete message into a mail command such as `sendmail -t`
#[derive(Debug, Clone)]
pub struct CommandMailer {
    command: String,
    shell: String,
}

impl CommandMailer {
    /// Create a mailer running `command` through `shell`
    pub fn new(command: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: shell.into(),
        }
    }

    /// Mailer configured for a site
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.mail_command.clone(), config.shell.clone())
    }
}

impl Mailer for CommandMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            write!(stdin, "To: {to}\nSubject: {subject}\n\n{body}")?;
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(RelayError::Transport {
                site: to.to_string(),
                message: format!("mail command exited with {status}"),
            });
        }
        debug!("Mailed \"{}\" to {}", subject, to);
        Ok(())
    }
}

/// Reports things a site administrator should look at
pub trait Notifier {
    /// Send a notice
    fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Mails notices to the administrator
#[derive(Debug, Clone)]
pub struct MailNotifier<M> {
    mailer: M,
    address: String,
}

impl<M: Mailer> MailNotifier<M> {
    /// Create a notifier mailing to `address`
    pub fn new(mailer: M, address: impl Into<String>) -> Self {
        Self {
            mailer,
            address: address.into(),
        }
    }
}

impl<M: Mailer> Notifier for MailNotifier<M> {
    fn notify(&self, subject: &str, body: &str) -> Result<()> {
        self.mailer.send(&self.address, subject, body)
    }
}

/// Writes notices to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<()> {
        warn!("{}: {}", subject, body.trim_end());
        Ok(())
    }
}

/// Runs transmit templates, or mails files when the feed says so
///
/// # Options
///
/// * `M` - mail instead; the user is `M"@user"`, `M":user"`, `M"user"` or
///   the receiver name
/// * `S` - run the command directly rather than through the shell, unless
///   the transmit field needs `<`, `>` or `$`
/// * `X` - the systems form one multicast group; one command for all
/// * `U` - value for `%U` when sending the spool copy
/// * `D` - append what was sent to the transmission log
pub struct CommandTransport {
    shell: String,
    default_transmit: String,
    xmitlog: PathBuf,
    mailer: Box<dyn Mailer>,
}

impl CommandTransport {
    /// Create a transport using the site's shell, default template and mailer
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            default_transmit: config.default_transmit.clone(),
            xmitlog: config.xmitlog_file(),
            mailer: Box::new(CommandMailer::from_config(config)),
        }
    }

    /// Replace the mailer used by the M option
    #[must_use]
    pub fn with_mailer(mut self, mailer: impl Mailer + 'static) -> Self {
        self.mailer = Box::new(mailer);
        self
    }

    fn by_mail(&self, request: &TransmitRequest<'_>, receiver: &str) -> Result<()> {
        let feed = request.feed;
        let user = feed
            .quoted_option('M')
            .or_else(|| feed.option('M'))
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| receiver.to_string());

        let to = request
            .system_list()
            .into_iter()
            .map(|system| mail_address(&user, system))
            .collect::<Vec<_>>()
            .join(", ");

        let content = fs::read(request.file)?;
        let body = mail_body(&String::from_utf8_lossy(&content));
        self.mailer.send(&to, MAIL_SUBJECT, &body)?;
        info!("{} mailed to {}", display_id(request), to);
        Ok(())
    }

    fn run(&self, command: &str, stdin: Option<&Path>, direct: bool, target: &str) -> Result<()> {
        let mut process = if direct {
            let mut words = command.split_whitespace();
            let program = words.next().ok_or_else(|| RelayError::Transport {
                site: target.to_string(),
                message: "empty transmit command".to_string(),
            })?;
            let mut process = Command::new(program);
            process.args(words);
            process
        } else {
            let mut process = Command::new(&self.shell);
            process.arg("-c").arg(command);
            process
        };

        if let Some(file) = stdin {
            process.stdin(File::open(file)?);
        }

        debug!("Transmitting via {}", command);
        let status = process.status().map_err(|e| RelayError::Transport {
            site: target.to_string(),
            message: format!("can't run `{command}`: {e}"),
        })?;
        if !status.success() {
            return Err(RelayError::Transport {
                site: target.to_string(),
                message: format!("`{command}` exited with {status}"),
            });
        }
        Ok(())
    }

    fn log_payload(&self, file: &Path) -> Result<()> {
        let content = fs::read(file)?;
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.xmitlog)?;
        log.write_all(&content)?;
        log.write_all(b"\nEOT\n")?;
        Ok(())
    }
}

impl Transport for CommandTransport {
    fn transmit(&self, request: &TransmitRequest<'_>) -> Result<()> {
        let feed = request.feed;
        let receiver = receiver_command(feed, request.batched);

        if feed.has_option('M') {
            return self.by_mail(request, receiver);
        }

        let multicast = feed.has_option('X');
        if multicast && feed.transmit.trim().is_empty() {
            return Err(RelayError::Transport {
                site: request.systems.to_string(),
                message: "can't multicast without explicit transmission command".to_string(),
            });
        }

        let template = if feed.transmit.trim().is_empty() {
            self.default_transmit.as_str()
        } else {
            feed.transmit.as_str()
        };
        let direct = feed.has_option('S') && !feed.transmit.contains(['<', '>', '$']);

        let systems = request.system_list();
        let targets = if multicast {
            vec![systems.join(" ")]
        } else {
            systems.iter().map(|s| s.to_string()).collect()
        };

        let mut failure = None;
        for target in &targets {
            let expanded = expand_template(template, request, receiver, target);
            let mut command = expanded.command;
            let mut stdin = None;
            if !expanded.names_file {
                if direct {
                    stdin = Some(request.file);
                } else {
                    command.push_str(" <");
                    command.push_str(&request.file.to_string_lossy());
                }
            }
            if let Err(e) = self.run(&command, stdin, direct, target) {
                warn!("{}", e);
                failure.get_or_insert(e);
            }
        }

        if feed.has_option('D') {
            self.log_payload(request.file)?;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// One transmission seen by [`DryRunTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCopy {
    /// Target systems as given
    pub systems: String,
    /// Message-ID, empty for batches
    pub message_id: String,
    /// Whether the payload was a batch
    pub batched: bool,
    /// Payload text at the time of the call
    pub payload: String,
}

/// Logs what would be sent and keeps a copy instead of running anything
#[derive(Debug, Default)]
pub struct DryRunTransport {
    sent: RefCell<Vec<SentCopy>>,
}

impl DryRunTransport {
    /// Create an empty dry-run transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<SentCopy> {
        self.sent.borrow().clone()
    }

    /// Number of transmissions so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.sent.borrow().len()
    }

    /// Whether nothing was sent
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent.borrow().is_empty()
    }
}

impl Transport for DryRunTransport {
    fn transmit(&self, request: &TransmitRequest<'_>) -> Result<()> {
        let payload = fs::read(request.file)?;
        info!(
            "would transmit {} to {} via {}",
            display_id(request),
            request.systems,
            receiver_command(request.feed, request.batched)
        );
        self.sent.borrow_mut().push(SentCopy {
            systems: request.systems.to_string(),
            message_id: request.message_id.to_string(),
            batched: request.batched,
            payload: String::from_utf8_lossy(&payload).into_owned(),
        });
        Ok(())
    }
}

fn display_id<'a>(request: &TransmitRequest<'a>) -> &'a str {
    if request.message_id.is_empty() {
        "batch"
    } else {
        request.message_id
    }
}
