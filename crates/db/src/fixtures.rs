use chrono::{Duration, Utc};

use convoy_core::domain::location::NewLocation;
use convoy_core::domain::status_update::NewStatusUpdate;
use convoy_core::domain::trip::{Coordinates, NewTrip, Trip, TripQuery, TripStatus};
use convoy_core::domain::user::{NewUser, Role, User};

use crate::repositories::{FleetStore, RepositoryError, TransitionCommit};

struct SeedUser {
    external_id: &'static str,
    first_name: &'static str,
    last_name: &'static str,
    role: Role,
}

const SEED_USERS: &[SeedUser] = &[
    SeedUser {
        external_id: "demo-manager",
        first_name: "Morgan",
        last_name: "Reyes",
        role: Role::Manager,
    },
    SeedUser {
        external_id: "demo-driver-1",
        first_name: "Dana",
        last_name: "Kowalski",
        role: Role::Driver,
    },
    SeedUser {
        external_id: "demo-driver-2",
        first_name: "Eli",
        last_name: "Brandt",
        role: Role::Driver,
    },
    SeedUser {
        external_id: "demo-shipper",
        first_name: "Priya",
        last_name: "Nair",
        role: Role::Shipper,
    },
    SeedUser {
        external_id: "demo-consignee",
        first_name: "Tomas",
        last_name: "Ortega",
        role: Role::Consignee,
    },
];

/// Deterministic demo fleet used by `convoy seed` and the CLI smoke paths.
///
/// Produces one manager, two drivers, a shipper and a consignee, plus three trips: a completed
/// delivery, an in-transit delivery with a recent position fix, and a freshly assigned one.
pub struct DemoFleetDataset;

impl DemoFleetDataset {
    pub const EXPECTED_USERS: usize = 5;
    pub const EXPECTED_TRIPS: usize = 3;

    /// Loads the dataset. Users are upserted; trips are only created on the first run.
    pub async fn load<S>(store: &S) -> Result<SeedResult, RepositoryError>
    where
        S: FleetStore + ?Sized,
    {
        let mut users = Vec::with_capacity(SEED_USERS.len());
        for seed in SEED_USERS {
            users.push(
                store
                    .upsert_user(NewUser {
                        external_id: seed.external_id.to_owned(),
                        username: Some(seed.external_id.replace('-', "_")),
                        first_name: Some(seed.first_name.to_owned()),
                        last_name: Some(seed.last_name.to_owned()),
                        phone_number: None,
                        role: Some(seed.role),
                    })
                    .await?,
            );
        }
        let [manager, first_driver, second_driver, shipper, consignee] = match users.as_slice() {
            [a, b, c, d, e] => [a, b, c, d, e],
            _ => return Err(RepositoryError::Decode("demo user set is incomplete".to_owned())),
        };

        let existing =
            store.list_trips(TripQuery::all().for_party(Role::Manager, manager.id)).await?;
        if !existing.is_empty() {
            return Ok(SeedResult { users_seeded: users.len(), trips_created: 0 });
        }

        let delivered = store
            .create_trip(demo_trip(manager, first_driver, shipper, consignee, "Oak Street Market"))
            .await?;
        drive(store, &delivered, first_driver, &[TripStatus::InTransit, TripStatus::Completed])
            .await?;

        let mut en_route =
            demo_trip(manager, first_driver, shipper, consignee, "Harbor Cold Storage, Pier 4");
        en_route.delivery = Some(Coordinates::new(47.6062, -122.3321));
        en_route.delivery_window_start = Some(Utc::now() + Duration::hours(1));
        en_route.delivery_window_end = Some(Utc::now() + Duration::hours(3));
        let en_route = store.create_trip(en_route).await?;
        drive(
            store,
            &en_route,
            first_driver,
            &[TripStatus::AtPickup, TripStatus::Loading, TripStatus::InTransit],
        )
        .await?;
        store
            .record_location(NewLocation {
                trip_id: en_route.id,
                coordinates: Coordinates::new(47.2529, -122.4443),
                recorded_at: Utc::now(),
            })
            .await?;

        store
            .create_trip(demo_trip(manager, second_driver, shipper, consignee, "Valley Distribution"))
            .await?;

        Ok(SeedResult { users_seeded: users.len(), trips_created: Self::EXPECTED_TRIPS })
    }

    pub async fn verify<S>(store: &S) -> Result<VerificationResult, RepositoryError>
    where
        S: FleetStore + ?Sized,
    {
        let mut checks = Vec::new();
        let mut manager = None;

        for seed in SEED_USERS {
            let user = store.find_user_by_external_id(seed.external_id).await?;
            checks.push((
                seed.external_id,
                user.as_ref().is_some_and(|user| user.has_role(seed.role)),
            ));
            if seed.role == Role::Manager {
                manager = user;
            }
        }

        let trips = match &manager {
            Some(manager) => {
                store.list_trips(TripQuery::all().for_party(Role::Manager, manager.id)).await?
            }
            None => Vec::new(),
        };
        checks.push(("demo-trips", trips.len() == Self::EXPECTED_TRIPS));
        checks.push((
            "demo-trip-in-transit",
            trips.iter().any(|trip| trip.status == TripStatus::InTransit),
        ));
        checks.push((
            "demo-trip-completed",
            trips.iter().any(|trip| trip.status == TripStatus::Completed),
        ));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }
}

fn demo_trip(
    manager: &User,
    driver: &User,
    shipper: &User,
    consignee: &User,
    delivery_address: &str,
) -> NewTrip {
    NewTrip {
        driver_id: Some(driver.id),
        shipper_id: Some(shipper.id),
        consignee_id: Some(consignee.id),
        manager_id: Some(manager.id),
        pickup_address: "North Yard, Dock 2".to_owned(),
        delivery_address: delivery_address.to_owned(),
        cargo_description: "Palletized dry goods".to_owned(),
        cargo_weight: Some(8_400.0),
        cargo_volume: Some(32.0),
        ..NewTrip::default()
    }
}

async fn drive<S>(
    store: &S,
    trip: &Trip,
    driver: &User,
    statuses: &[TripStatus],
) -> Result<(), RepositoryError>
where
    S: FleetStore + ?Sized,
{
    for status in statuses {
        store
            .commit_transition(TransitionCommit {
                trip_id: trip.id,
                status_update: NewStatusUpdate {
                    trip_id: trip.id,
                    actor_id: driver.id,
                    status: *status,
                    notes: Some("seeded".to_owned()),
                    recorded_at: Utc::now(),
                },
                issue: None,
                notifications: Vec::new(),
            })
            .await?;
    }
    Ok(())
}

#[derive(Debug)]
pub struct SeedResult {
    pub users_seeded: usize,
    pub trips_created: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
