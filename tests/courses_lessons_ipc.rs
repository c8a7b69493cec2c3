
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn course_and_lesson_crud_roundtrip() {
    let workspace = temp_dir("coursedesk-courses");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "name": "Algebra I", "description": "Linear equations and graphs" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();

    let l1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "lessons.create",
        json!({ "courseId": course_id, "title": "Variables" }),
    );
    let l1_id = l1["lessonId"].as_str().expect("lessonId").to_string();
    let l2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "lessons.create",
        json!({ "courseId": course_id, "title": "Equations", "durationMinutes": 50 }),
    );
    let l2_id = l2["lessonId"].as_str().expect("lessonId").to_string();

    // Auto-assigned sort order follows insertion.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "lessons.list",
        json!({ "courseId": course_id }),
    );
    let lessons = listed["lessons"].as_array().expect("lessons");
    assert_eq!(lessons.len(), 2);
    assert_eq!(lessons[0]["title"], json!("Variables"));
    assert_eq!(lessons[1]["sortOrder"], json!(1));
    assert_eq!(lessons[1]["durationMinutes"], json!(50));
    assert!(lessons[0]["courseInstanceId"].is_null());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "lessons.reorder",
        json!({ "courseId": course_id, "lessonIdOrder": [l2_id, l1_id] }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "lessons.list",
        json!({ "courseId": course_id }),
    );
    assert_eq!(listed["lessons"][0]["title"], json!("Equations"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "lessons.update",
        json!({ "lessonId": l1_id, "patch": { "title": "Variables & Constants", "detail": "Warm-up drill" } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "lessons.delete",
        json!({ "lessonId": l2_id }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "lessons.list",
        json!({ "courseId": course_id }),
    );
    assert_eq!(listed["lessons"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(listed["lessons"][0]["title"], json!("Variables & Constants"));

    let courses = request_ok(&mut stdin, &mut reader, "11", "courses.list", json!({}));
    assert_eq!(courses["courses"][0]["templateLessonCount"], json!(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "courses.delete",
        json!({ "courseId": course_id }),
    );
    let courses = request_ok(&mut stdin, &mut reader, "13", "courses.list", json!({}));
    assert_eq!(courses["courses"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn instance_lessons_are_scoped_to_their_instance() {
    let workspace = temp_dir("coursedesk-instance-lessons");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let institution = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "institutions.create",
        json!({ "name": "Riverside Prep" }),
    );
    let instructor = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "instructors.create",
        json!({ "name": "Morgan Hale" }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({ "name": "Biology" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId");
    let instance = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "instances.create",
        json!({
            "courseId": course_id,
            "institutionId": institution["institutionId"],
            "instructorId": instructor["instructorId"],
            "startDate": "2024-09-01"
        }),
    );
    let instance_id = instance["courseInstanceId"].as_str().expect("id");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "lessons.create",
        json!({ "courseId": course_id, "title": "Shared Template" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "lessons.create",
        json!({
            "courseId": course_id,
            "courseInstanceId": instance_id,
            "title": "Field Trip Prep"
        }),
    );

    let template = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "lessons.list",
        json!({ "courseId": course_id }),
    );
    assert_eq!(template["lessons"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(template["lessons"][0]["title"], json!("Shared Template"));

    let scoped = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "lessons.list",
        json!({ "courseId": course_id, "courseInstanceId": instance_id }),
    );
    assert_eq!(scoped["lessons"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(scoped["lessons"][0]["title"], json!("Field Trip Prep"));
    assert_eq!(scoped["lessons"][0]["courseInstanceId"], json!(instance_id));

    // A lesson cannot be attached to an instance of another course.
    let other_course = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "courses.create",
        json!({ "name": "Physics" }),
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "11",
            "lessons.create",
            json!({
                "courseId": other_course["courseId"],
                "courseInstanceId": instance_id,
                "title": "Orphan"
            }),
        ),
        "not_found"
    );

    // A course with live instances refuses deletion.
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "12",
            "courses.delete",
            json!({ "courseId": course_id }),
        ),
        "in_use"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
