//! Executes a notification plan against a sink, one receipt per request.

use crate::error::NotificationError;
use async_trait::async_trait;
use futures::future::join_all;
use incident_schema::{
    EmailReceipt, EmailRequest, EmailStatus, NotificationPlan, NotificationResult, TicketReceipt,
    TicketRequest, TicketStatus,
};
use std::sync::Arc;

/// Ticketing and email integration. Each call yields the external id.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn create_ticket(&self, request: &TicketRequest) -> Result<String, NotificationError>;

    async fn send_email(&self, request: &EmailRequest) -> Result<String, NotificationError>;
}

/// Accepts everything and hands out random ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubNotificationSink;

#[async_trait]
impl NotificationSink for StubNotificationSink {
    fn name(&self) -> &str {
        "stub integrations"
    }

    async fn create_ticket(&self, request: &TicketRequest) -> Result<String, NotificationError> {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        let ticket_id = format!("TCK-{}", hex[..8].to_uppercase());
        tracing::info!(%ticket_id, priority = %request.priority, "created ticket");
        Ok(ticket_id)
    }

    async fn send_email(&self, request: &EmailRequest) -> Result<String, NotificationError> {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        let message_id = format!("MSG-{}", &hex[..10]);
        tracing::info!(
            recipient = %request.recipient,
            subject = %request.subject,
            "queued email"
        );
        Ok(message_id)
    }
}

#[derive(Clone)]
pub struct NotificationExecutor {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationExecutor {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn stub() -> Self {
        Self::new(Arc::new(StubNotificationSink))
    }

    /// Runs every ticket and email as its own task. A failed or panicking
    /// send becomes a failed receipt in its own slot; the plan is returned
    /// unchanged.
    pub async fn execute(&self, plan: NotificationPlan) -> NotificationResult {
        let ticket_tasks: Vec<_> = plan
            .tickets
            .iter()
            .cloned()
            .map(|request| {
                let sink = Arc::clone(&self.sink);
                tokio::spawn(async move { create_ticket(&*sink, request).await })
            })
            .collect();
        let email_tasks: Vec<_> = plan
            .emails
            .iter()
            .cloned()
            .map(|request| {
                let sink = Arc::clone(&self.sink);
                tokio::spawn(async move { send_email(&*sink, request).await })
            })
            .collect();
        let (tickets, emails) = tokio::join!(join_all(ticket_tasks), join_all(email_tasks));

        let tickets: Vec<TicketReceipt> = tickets
            .into_iter()
            .zip(&plan.tickets)
            .map(|(joined, request)| {
                joined.unwrap_or_else(|err| {
                    tracing::error!(title = %request.title, %err, "ticket task failed");
                    failed_ticket(request.clone(), NotificationError::TaskFailed(err.to_string()))
                })
            })
            .collect();
        let emails: Vec<EmailReceipt> = emails
            .into_iter()
            .zip(&plan.emails)
            .map(|(joined, request)| {
                joined.unwrap_or_else(|err| {
                    tracing::error!(recipient = %request.recipient, %err, "email task failed");
                    failed_email(request.clone(), NotificationError::TaskFailed(err.to_string()))
                })
            })
            .collect();

        let created = tickets
            .iter()
            .filter(|r| r.status == TicketStatus::Created)
            .count();
        let sent = emails
            .iter()
            .filter(|r| r.status == EmailStatus::Sent)
            .count();
        let notes = format!(
            "{created} of {} tickets created; {sent} of {} emails sent via {}",
            tickets.len(),
            emails.len(),
            self.sink.name()
        );

        NotificationResult {
            plan,
            tickets,
            emails,
            notes: Some(notes),
        }
    }
}

async fn create_ticket(sink: &dyn NotificationSink, request: TicketRequest) -> TicketReceipt {
    match sink.create_ticket(&request).await {
        Ok(ticket_id) => TicketReceipt {
            status: TicketStatus::Created,
            request,
            ticket_id: Some(ticket_id),
            error: None,
        },
        Err(err) => {
            tracing::warn!(title = %request.title, %err, "ticket creation failed");
            failed_ticket(request, err)
        }
    }
}

async fn send_email(sink: &dyn NotificationSink, request: EmailRequest) -> EmailReceipt {
    match sink.send_email(&request).await {
        Ok(message_id) => EmailReceipt {
            recipient: request.recipient.clone(),
            status: EmailStatus::Sent,
            request,
            message_id: Some(message_id),
            error: None,
        },
        Err(err) => {
            tracing::warn!(recipient = %request.recipient, %err, "email send failed");
            failed_email(request, err)
        }
    }
}

fn failed_ticket(request: TicketRequest, err: NotificationError) -> TicketReceipt {
    TicketReceipt {
        status: TicketStatus::Failed,
        request,
        ticket_id: None,
        error: Some(err.to_string()),
    }
}

fn failed_email(request: EmailRequest, err: NotificationError) -> EmailReceipt {
    EmailReceipt {
        recipient: request.recipient.clone(),
        status: EmailStatus::Failed,
        request,
        message_id: None,
        error: Some(err.to_string()),
    }
}
