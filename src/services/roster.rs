use crate::{
    error::{AppError, Result},
    models::client::*,
    services::Database,
    utils::validation,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

pub const CLIENT_TABLE: &str = "client";
pub const BOOKING_TABLE: &str = "booking";
pub const PACKAGE_TABLE: &str = "client_package";
pub const EVENT_TABLE: &str = "event";
pub const ASSESSMENT_TABLE: &str = "assessment";

/// 客户名册：客户、预约、课时包与活动的录入和快照
#[derive(Clone)]
pub struct RosterService {
    db: Arc<Database>,
}

impl RosterService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    pub async fn create_client(&self, request: CreateClientRequest) -> Result<Client> {
        request.validate()?;
        if let Some(phone) = &request.phone {
            validation::validate_phone(phone)?;
        }

        let client = Client {
            id: request.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            first_name: request.first_name,
            last_name: request.last_name.unwrap_or_default(),
            username: request.username,
            email: request.email.to_lowercase(),
            phone: request
                .phone
                .as_deref()
                .map(validation::normalize_phone)
                .unwrap_or_default(),
            is_active: request.is_active.unwrap_or(true),
            created_at: Utc::now(),
        };

        let created = self.db.create(CLIENT_TABLE, &client.id, client.clone()).await?;
        info!("Registered client {}", created.id);
        Ok(created)
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Client> {
        self.db
            .get_by_id(CLIENT_TABLE, client_id)
            .await?
            .ok_or_else(|| AppError::not_found("Client"))
    }

    pub async fn list_clients(&self) -> Result<Vec<Client>> {
        let mut clients: Vec<Client> = self.db.select_all(CLIENT_TABLE).await?;
        clients.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(clients)
    }

    pub async fn create_booking(&self, request: CreateBookingRequest) -> Result<Booking> {
        request.validate()?;
        self.get_client(&request.client_id).await?;

        let booking = Booking {
            id: request.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            client_id: request.client_id,
            player_name: request.player_name,
            coach_name: request.coach_name,
            session_type: request.session_type,
            scheduled_date: request.scheduled_date,
            scheduled_time: request.scheduled_time,
            status: request.status.unwrap_or(BookingStatus::Pending),
            created_at: Utc::now(),
        };

        debug!("Recording booking {} for client {}", booking.id, booking.client_id);
        self.db.create(BOOKING_TABLE, &booking.id, booking).await
    }

    pub async fn create_package(&self, request: CreateClientPackageRequest) -> Result<ClientPackage> {
        request.validate()?;
        self.get_client(&request.client_id).await?;

        if request.expiry_date < request.start_date {
            return Err(AppError::validation("expiry_date must not be before start_date"));
        }

        let package = ClientPackage {
            id: request.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            client_id: request.client_id,
            package_name: request.package_name,
            start_date: request.start_date,
            expiry_date: request.expiry_date,
            sessions_remaining: request.sessions_remaining,
            sessions_used: request.sessions_used.unwrap_or(0),
            status: request.status.unwrap_or(PackageStatus::Active),
            created_at: Utc::now(),
        };

        debug!("Recording package {} for client {}", package.id, package.client_id);
        self.db.create(PACKAGE_TABLE, &package.id, package).await
    }

    pub async fn create_event(&self, request: CreateEventRequest) -> Result<Event> {
        request.validate()?;

        let event = Event {
            id: request.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: request.name,
            event_start_date: request.event_start_date,
            event_end_date: request.event_end_date,
            location: request.location.filter(|l| !l.trim().is_empty()),
            is_active: request.is_active.unwrap_or(true),
            created_at: Utc::now(),
        };

        self.db.create(EVENT_TABLE, &event.id, event).await
    }

    pub async fn list_events(&self) -> Result<Vec<Event>> {
        self.db.select_all(EVENT_TABLE).await
    }

    pub async fn get_booking(&self, booking_id: &str) -> Result<Booking> {
        self.db
            .get_by_id(BOOKING_TABLE, booking_id)
            .await?
            .ok_or_else(|| AppError::not_found("Booking"))
    }

    pub async fn create_assessment(&self, request: CreateAssessmentRequest) -> Result<Assessment> {
        request.validate()?;
        self.get_client(&request.client_id).await?;
        if let Some(booking_id) = &request.booking_id {
            self.get_booking(booking_id).await?;
        }

        let assessment = Assessment {
            id: request.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            client_id: request.client_id,
            booking_id: request.booking_id,
            player_name: request.player_name,
            coach_name: request.coach_name,
            training_type: request.training_type.filter(|t| !t.trim().is_empty()),
            assessment_date: request.assessment_date,
            notification_sent: false,
            created_at: Utc::now(),
        };

        debug!("Recording assessment {} for client {}", assessment.id, assessment.client_id);
        self.db.create(ASSESSMENT_TABLE, &assessment.id, assessment).await
    }

    pub async fn get_assessment(&self, assessment_id: &str) -> Result<Assessment> {
        self.db
            .get_by_id(ASSESSMENT_TABLE, assessment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Assessment"))
    }

    pub async fn mark_assessment_notified(&self, assessment_id: &str) -> Result<Assessment> {
        let mut assessment = self.get_assessment(assessment_id).await?;
        assessment.notification_sent = true;
        self.db
            .upsert(ASSESSMENT_TABLE, assessment_id, assessment)
            .await
    }

    /// 读取当前名册快照
    pub async fn snapshot(&self) -> Result<RosterSnapshot> {
        Ok(RosterSnapshot {
            clients: self.db.select_all(CLIENT_TABLE).await?,
            bookings: self.db.select_all(BOOKING_TABLE).await?,
            packages: self.db.select_all(PACKAGE_TABLE).await?,
        })
    }
}
