//! Diverting unapproved postings to moderators
//!
//! A local posting to a moderated group without an Approved header is
//! mailed to the group's moderator instead of being filed. The moderator
//! comes from the mailpaths table, or failing that from the backbone
//! template, where `%s` stands for the group name with dots turned into
//! dashes.

use tracing::{info, warn};

use crate::active::ActiveGroups;
use crate::article::Article;
use crate::resolver::{CompiledArticle, DestinationStatus};
use crate::transport::Mailer;

/// Submission address for a moderated group
///
/// ```
/// use news_relay::moderation::moderator_address;
///
/// assert_eq!(
///     moderator_address("comp.lang.rust", None, Some("%s@moderators.example.org")),
///     Some("comp-lang-rust@moderators.example.org".to_string())
/// );
/// assert_eq!(moderator_address("comp.lang.rust", Some("mod@rust"), None), Some("mod@rust".into()));
/// assert_eq!(moderator_address("comp.lang.rust", None, None), None);
/// ```
#[must_use]
pub fn moderator_address(
    group: &str,
    mailpath: Option<&str>,
    backbone: Option<&str>,
) -> Option<String> {
    if let Some(address) = mailpath.map(str::trim).filter(|a| !a.is_empty()) {
        return Some(address.to_string());
    }
    backbone
        .filter(|b| !b.trim().is_empty())
        .map(|template| template.replace("%s", &group.replace('.', "-")))
}

/// Mail an unapproved article to the moderators of its moderated groups
///
/// Slots that were mailed become [`DestinationStatus::Mailed`]; slots
/// whose moderator is unknown or unreachable become
/// [`DestinationStatus::CantMail`]. Returns the number of groups mailed.
/// Only local postings are moderated this way; relayed articles are
/// already approved or came in through a moderator.
///
/// # Arguments
///
/// * `compiled` - Destinations of the article, updated in place
/// * `article` - The posting
/// * `active` - Active groups, for the moderation flag
/// * `backbone` - Fallback moderator template
/// * `mailer` - Mail delivery
pub fn moderate(
    compiled: &mut CompiledArticle,
    article: &Article,
    active: &ActiveGroups,
    backbone: Option<&str>,
    mailer: &dyn Mailer,
) -> usize {
    let approved = article
        .headers
        .approved
        .as_deref()
        .is_some_and(|a| !a.trim().is_empty());
    if approved {
        return 0;
    }

    let mut mailed = 0;
    let mut text: Option<String> = None;
    for dest in compiled
        .destinations
        .iter_mut()
        .filter(|d| d.status == DestinationStatus::Ok)
    {
        let Some(group) = dest.group.as_deref() else {
            continue;
        };
        if !active.find(group).is_some_and(|g| g.is_moderated()) {
            continue;
        }

        let Some(address) = moderator_address(group, dest.moderator.as_deref(), backbone) else {
            warn!("no moderator known for {}", group);
            dest.status = DestinationStatus::CantMail;
            continue;
        };

        let body = text.get_or_insert_with(|| article.to_spool_text());
        match mailer.send(&address, &article.headers.subject, body) {
            Ok(()) => {
                info!("{} mailed to moderator {} of {}", article.headers.message_id, address, group);
                dest.status = DestinationStatus::Mailed;
                mailed += 1;
            }
            Err(e) => {
                warn!("can't mail {} to {}: {}", group, address, e);
                dest.status = DestinationStatus::CantMail;
            }
        }
    }
    mailed
}
