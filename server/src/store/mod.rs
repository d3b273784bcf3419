pub mod models;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;

use models::{
    ChatMessage, NewRide, NewUser, RequestStatus, Ride, RideRating, RideRequest, RideStatus, User,
};

/// Shared handle to the in-memory record store.
/// All tables live behind a single mutex so id allocation and insertion are
/// one atomic step.
pub type SharedStore = Arc<RecordStore>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,
    #[error("chat message capacity of {0} reached")]
    CapacityExceeded(usize),
    #[error("ride {0} not found")]
    RideNotFound(i64),
    #[error("ride request {0} not found")]
    RequestNotFound(i64),
    #[error("email {0} is already registered")]
    DuplicateEmail(String),
    #[error("ride {0} has no seats available")]
    NoSeatsAvailable(i64),
}

/// Monotonic identifier source for one entity kind. First id handed out is 1.
#[derive(Debug, Default)]
struct IdSequence(i64);

impl IdSequence {
    fn next(&mut self) -> i64 {
        self.0 += 1;
        self.0
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    user_ids: IdSequence,
    rides: BTreeMap<i64, Ride>,
    ride_ids: IdSequence,
    ride_requests: BTreeMap<i64, RideRequest>,
    request_ids: IdSequence,
    ride_ratings: BTreeMap<i64, RideRating>,
    rating_ids: IdSequence,
    chat_messages: BTreeMap<i64, ChatMessage>,
    chat_ids: IdSequence,
}

#[derive(Debug, Default)]
pub struct RecordStore {
    tables: Mutex<Tables>,
    /// Upper bound on stored chat messages; `None` means unbounded.
    max_chat_messages: Option<usize>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat_capacity(max_chat_messages: Option<usize>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            max_chat_messages,
        }
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    // --- Chat messages ---

    /// Allocate an id and store a new chat message. The returned record is the
    /// one that was persisted.
    pub fn create_chat_message(
        &self,
        ride_id: i64,
        user_id: Option<i64>,
        message: String,
        timestamp: DateTime<Utc>,
    ) -> Result<ChatMessage, StoreError> {
        let mut tables = self.lock()?;

        if let Some(max) = self.max_chat_messages {
            if tables.chat_messages.len() >= max {
                return Err(StoreError::CapacityExceeded(max));
            }
        }

        let id = tables.chat_ids.next();
        let record = ChatMessage {
            id,
            ride_id,
            user_id,
            message,
            timestamp,
        };
        tables.chat_messages.insert(id, record.clone());
        Ok(record)
    }

    /// All messages for a ride, oldest first. Equal timestamps keep id order.
    pub fn chat_messages_for_ride(&self, ride_id: i64) -> Result<Vec<ChatMessage>, StoreError> {
        let tables = self.lock()?;
        let mut messages: Vec<ChatMessage> = tables
            .chat_messages
            .values()
            .filter(|m| m.ride_id == ride_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    pub fn chat_message_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.chat_messages.len())
    }

    // --- Users ---

    pub fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.lock()?;
        if tables.users.values().any(|u| u.email == new_user.email) {
            return Err(StoreError::DuplicateEmail(new_user.email));
        }

        let id = tables.user_ids.next();
        let user = User {
            id,
            email: new_user.email,
            full_name: new_user.full_name,
            password_hash: new_user.password_hash,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    // --- Rides ---

    /// New rides start out pending with no tracking data.
    pub fn create_ride(&self, new_ride: NewRide) -> Result<Ride, StoreError> {
        let mut tables = self.lock()?;
        let id = tables.ride_ids.next();
        let ride = Ride {
            id,
            creator_id: new_ride.creator_id,
            source: new_ride.source,
            destination: new_ride.destination,
            departure_time: new_ride.departure_time,
            available_seats: new_ride.available_seats,
            cost_per_seat: new_ride.cost_per_seat,
            status: RideStatus::Pending,
            current_location: None,
            route_data: None,
        };
        tables.rides.insert(id, ride.clone());
        Ok(ride)
    }

    pub fn get_ride(&self, id: i64) -> Result<Option<Ride>, StoreError> {
        Ok(self.lock()?.rides.get(&id).cloned())
    }

    pub fn list_rides(&self) -> Result<Vec<Ride>, StoreError> {
        Ok(self.lock()?.rides.values().cloned().collect())
    }

    pub fn update_ride_status(&self, id: i64, status: RideStatus) -> Result<Ride, StoreError> {
        self.modify_ride(id, |ride| ride.status = status)
    }

    pub fn update_ride_location(&self, id: i64, location: String) -> Result<Ride, StoreError> {
        self.modify_ride(id, |ride| ride.current_location = Some(location))
    }

    pub fn update_ride_route(&self, id: i64, route_data: String) -> Result<Ride, StoreError> {
        self.modify_ride(id, |ride| ride.route_data = Some(route_data))
    }

    fn modify_ride(&self, id: i64, f: impl FnOnce(&mut Ride)) -> Result<Ride, StoreError> {
        let mut tables = self.lock()?;
        let ride = tables
            .rides
            .get_mut(&id)
            .ok_or(StoreError::RideNotFound(id))?;
        f(ride);
        Ok(ride.clone())
    }

    // --- Ride requests ---

    pub fn create_ride_request(&self, ride_id: i64, user_id: i64) -> Result<RideRequest, StoreError> {
        let mut tables = self.lock()?;
        if !tables.rides.contains_key(&ride_id) {
            return Err(StoreError::RideNotFound(ride_id));
        }

        let id = tables.request_ids.next();
        let request = RideRequest {
            id,
            ride_id,
            user_id,
            status: RequestStatus::Pending,
        };
        tables.ride_requests.insert(id, request.clone());
        Ok(request)
    }

    pub fn ride_requests_for(&self, ride_id: i64) -> Result<Vec<RideRequest>, StoreError> {
        Ok(self
            .lock()?
            .ride_requests
            .values()
            .filter(|r| r.ride_id == ride_id)
            .cloned()
            .collect())
    }

    /// Change a request's status. Moving a request to `Accepted` takes one
    /// seat from the ride, under the same lock as the status change.
    pub fn update_ride_request_status(
        &self,
        ride_id: i64,
        request_id: i64,
        status: RequestStatus,
    ) -> Result<RideRequest, StoreError> {
        let mut tables = self.lock()?;
        let tables = &mut *tables;

        let request = tables
            .ride_requests
            .get_mut(&request_id)
            .filter(|r| r.ride_id == ride_id)
            .ok_or(StoreError::RequestNotFound(request_id))?;
        let ride = tables
            .rides
            .get_mut(&ride_id)
            .ok_or(StoreError::RideNotFound(ride_id))?;

        if status == RequestStatus::Accepted && request.status != RequestStatus::Accepted {
            if ride.available_seats == 0 {
                return Err(StoreError::NoSeatsAvailable(ride_id));
            }
            ride.available_seats -= 1;
        }

        request.status = status;
        Ok(request.clone())
    }

    // --- Ratings ---

    pub fn create_ride_rating(
        &self,
        ride_id: i64,
        user_id: i64,
        rating: i32,
        review: Option<String>,
    ) -> Result<RideRating, StoreError> {
        let mut tables = self.lock()?;
        let id = tables.rating_ids.next();
        let record = RideRating {
            id,
            ride_id,
            user_id,
            rating,
            review,
        };
        tables.ride_ratings.insert(id, record.clone());
        Ok(record)
    }

    pub fn ride_ratings_for(&self, ride_id: i64) -> Result<Vec<RideRating>, StoreError> {
        Ok(self
            .lock()?
            .ride_ratings
            .values()
            .filter(|r| r.ride_id == ride_id)
            .cloned()
            .collect())
    }
}
