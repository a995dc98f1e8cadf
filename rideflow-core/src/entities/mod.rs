pub mod assignments;
pub mod coordinates;
pub mod driver_sessions;
pub mod drivers;
pub mod location_history;
pub mod rides;

use rideflow_sdk::objects::{
    DriverStatus as SdkDriverStatus, RideStatus as SdkRideStatus, RideType as SdkRideType,
};

/// Vehicle class for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `rideflow_sdk::objects::RideType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "ride_type")]
pub enum VehicleClass {
    Economy,
    Premium,
    Xl,
}

impl From<VehicleClass> for SdkRideType {
    fn from(value: VehicleClass) -> Self {
        match value {
            VehicleClass::Economy => SdkRideType::Economy,
            VehicleClass::Premium => SdkRideType::Premium,
            VehicleClass::Xl => SdkRideType::Xl,
        }
    }
}

impl From<SdkRideType> for VehicleClass {
    fn from(value: SdkRideType) -> Self {
        match value {
            SdkRideType::Economy => VehicleClass::Economy,
            SdkRideType::Premium => VehicleClass::Premium,
            SdkRideType::Xl => VehicleClass::Xl,
        }
    }
}

/// Ride status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `rideflow_sdk::objects::RideStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "ride_status")]
pub enum RideState {
    Requested,
    Matched,
    DriverArrived,
    InProgress,
    Completed,
    Cancelled,
    NoDriver,
}

impl From<RideState> for SdkRideStatus {
    fn from(value: RideState) -> Self {
        match value {
            RideState::Requested => SdkRideStatus::Requested,
            RideState::Matched => SdkRideStatus::Matched,
            RideState::DriverArrived => SdkRideStatus::DriverArrived,
            RideState::InProgress => SdkRideStatus::InProgress,
            RideState::Completed => SdkRideStatus::Completed,
            RideState::Cancelled => SdkRideStatus::Cancelled,
            RideState::NoDriver => SdkRideStatus::NoDriver,
        }
    }
}

impl From<SdkRideStatus> for RideState {
    fn from(value: SdkRideStatus) -> Self {
        match value {
            SdkRideStatus::Requested => RideState::Requested,
            SdkRideStatus::Matched => RideState::Matched,
            SdkRideStatus::DriverArrived => RideState::DriverArrived,
            SdkRideStatus::InProgress => RideState::InProgress,
            SdkRideStatus::Completed => RideState::Completed,
            SdkRideStatus::Cancelled => RideState::Cancelled,
            SdkRideStatus::NoDriver => RideState::NoDriver,
        }
    }
}

/// Driver availability for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "driver_status")]
pub enum DriverState {
    Offline,
    Available,
    Busy,
}

impl From<DriverState> for SdkDriverStatus {
    fn from(value: DriverState) -> Self {
        match value {
            DriverState::Offline => SdkDriverStatus::Offline,
            DriverState::Available => SdkDriverStatus::Available,
            DriverState::Busy => SdkDriverStatus::Busy,
        }
    }
}

impl From<SdkDriverStatus> for DriverState {
    fn from(value: SdkDriverStatus) -> Self {
        match value {
            SdkDriverStatus::Offline => DriverState::Offline,
            SdkDriverStatus::Available => DriverState::Available,
            SdkDriverStatus::Busy => DriverState::Busy,
        }
    }
}

/// Progress of a driver on an accepted ride.
///
/// Owned by the Driver-Location Service; the authoritative ride status lives
/// in the Ride Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "assignment_status")]
pub enum AssignmentStatus {
    Assigned,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AssignmentStatus::Assigned | AssignmentStatus::Arrived | AssignmentStatus::InProgress
        )
    }
}
