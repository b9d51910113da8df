mod common;

use anyhow::Result;
use classroom_enrollment::error::ErrorKind;
use classroom_enrollment::services::{BulkEnrollStudents, EnrollStudent};

use common::World;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enrollments_never_exceed_capacity() -> Result<()> {
    const CAPACITY: i32 = 3;
    const ATTEMPTS: usize = 12;

    let world = World::new().await;
    let caller = world.caller(&world.manager).await;
    let class = world.class(None, "7A", CAPACITY).await;
    let students = world.students(ATTEMPTS).await;

    let class_id = class.id;
    let mut handles = Vec::new();
    for student_id in students {
        let service = world.state.enrollment().clone();
        let caller = caller.clone();
        handles.push(tokio::spawn(async move {
            service
                .enroll_student(&caller, class_id, EnrollStudent { student_id, enrollment_date: None, notes: None })
                .await
        }));
    }

    let mut succeeded = 0;
    let mut capacity_failures = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => succeeded += 1,
            Err(e) if e.kind() == ErrorKind::ClassCapacityExceeded => capacity_failures += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, CAPACITY as usize);
    assert_eq!(succeeded + capacity_failures, ATTEMPTS);
    assert_eq!(world.repo.enrolled_count(class.id).await, CAPACITY as usize);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_bulk_enrollments_share_the_last_seats() -> Result<()> {
    let world = World::new().await;
    let caller = world.caller(&world.manager).await;
    let class = world.class(None, "7A", 5).await;
    let students = world.students(8).await;

    let first = students[..5].to_vec();
    let second = students[3..].to_vec();
    let service = world.state.enrollment();
    let (a, b) = futures::future::join(
        service.bulk_enroll_students(&caller, class.id, BulkEnrollStudents { student_ids: first, ..Default::default() }),
        service.bulk_enroll_students(&caller, class.id, BulkEnrollStudents { student_ids: second, ..Default::default() }),
    )
    .await;
    let (a, b) = (a?, b?);

    assert_eq!(a.len(), 5);
    assert_eq!(b.len(), 5);
    assert_eq!(a.succeeded.len() + b.succeeded.len(), 5);
    assert_eq!(world.repo.enrolled_count(class.id).await, 5);
    Ok(())
}
