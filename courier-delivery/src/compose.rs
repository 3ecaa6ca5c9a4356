//! Building new queue entries

use courier_common::internal;
use courier_store::{Message, Payload, Priority, SuppressionList, TransportParams};
use lettre::message::Mailbox;

use crate::error::ComposeError;

fn parse(address: &str) -> Result<Mailbox, ComposeError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| ComposeError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Drop suppressed addresses from `addresses`, logging each one
async fn filter_suppressed(
    suppressions: &dyn SuppressionList,
    addresses: Vec<String>,
) -> Result<Vec<String>, ComposeError> {
    let mut kept = Vec::with_capacity(addresses.len());

    for address in addresses {
        let mailbox = parse(&address)?;
        if suppressions.is_suppressed(&mailbox.email.to_string()).await? {
            internal!(
                level = INFO,
                "Not sending to {address} because it is on the suppression list"
            );
        } else {
            kept.push(address);
        }
    }

    Ok(kept)
}

/// Bare address of `address` (`Name <x@y.com>` becomes `x@y.com`), the form
/// suppression entries are matched against
///
/// # Errors
/// [`ComposeError::InvalidAddress`] when `address` is not a mailbox
pub fn bare_address(address: &str) -> Result<String, ComposeError> {
    parse(address).map(|mailbox| mailbox.email.to_string())
}

/// Build a message ready to be queued
///
/// The payload must name a sender; callers relying on a transport-wide
/// default sender fill it in first (see
/// [`crate::TransportConfig::default_from`]). Every address must parse as a
/// mailbox. Suppressed `to` and `bcc` recipients are removed
/// (case-insensitive, on the bare address), each removal logged at INFO. Nothing is persisted; pass the result to
/// [`courier_store::MessageStore::insert`]. Building the same message twice
/// produces two independent messages.
///
/// # Errors
/// - [`ComposeError::NoSender`] when the payload has no `from`
/// - [`ComposeError::InvalidAddress`] for an unparseable address
/// - [`ComposeError::NoRecipients`] when no recipient is left after filtering
/// - [`ComposeError::Store`] when the suppression list cannot be read
pub async fn make_message(
    suppressions: &dyn SuppressionList,
    payload: Payload,
    transport_params: Option<TransportParams>,
    priority: Priority,
) -> Result<Message, ComposeError> {
    let Some(from) = &payload.from else {
        return Err(ComposeError::NoSender);
    };
    parse(from)?;

    let to = filter_suppressed(suppressions, payload.to).await?;
    let bcc = filter_suppressed(suppressions, payload.bcc).await?;

    if to.is_empty() && bcc.is_empty() {
        return Err(ComposeError::NoRecipients);
    }

    Ok(Message::new(
        Payload { to, bcc, ..payload },
        transport_params,
        priority,
    ))
}
