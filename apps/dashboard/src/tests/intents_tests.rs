use super::*;

fn task(id: &str, invoice: &str) -> PendingTask {
    PendingTask {
        id: TaskId::new(id),
        invoice_id: InvoiceId::new(invoice),
        task_type: None,
        status: Some("pending".to_string()),
        created_at: None,
    }
}

#[test]
fn approve_accepts_ids_indexes_and_notes() {
    assert_eq!(
        parse_intent("approve task-9 price matches PO").expect("parsed"),
        Some(Intent::Act {
            action: ActionType::Approve,
            task: TaskRef::Id(TaskId::new("task-9")),
            notes: Some("price matches PO".to_string()),
        })
    );
    assert_eq!(
        parse_intent("  reject #2 ").expect("parsed"),
        Some(Intent::Act {
            action: ActionType::Reject,
            task: TaskRef::Index(2),
            notes: None,
        })
    );
    assert_eq!(
        parse_intent("approve").expect("parsed"),
        Some(Intent::Act {
            action: ActionType::Approve,
            task: TaskRef::Only,
            notes: None,
        })
    );
}

#[test]
fn blank_and_unknown_input() {
    assert_eq!(parse_intent("   ").expect("blank"), None);
    assert!(parse_intent("frobnicate").is_err());
    assert!(parse_intent("open").is_err());
}

#[test]
fn suggest_edit_requires_notes_and_allows_no_step() {
    assert!(parse_intent("suggest-edit s-1").is_err());
    assert_eq!(
        parse_intent("suggest-edit - vat should be 20%").expect("parsed"),
        Some(Intent::SuggestEdit {
            step_id: None,
            notes: "vat should be 20%".to_string(),
        })
    );
}

#[test]
fn only_task_resolution_needs_a_single_candidate() {
    let tasks = vec![task("t1", "inv-1"), task("t2", "inv-2"), task("t3", "inv-2")];

    assert_eq!(
        resolve_task(&TaskRef::Only, &tasks, Some(&InvoiceId::new("inv-1"))),
        Ok(TaskId::new("t1"))
    );
    assert!(resolve_task(&TaskRef::Only, &tasks, Some(&InvoiceId::new("inv-2"))).is_err());
    assert!(resolve_task(&TaskRef::Only, &tasks, Some(&InvoiceId::new("inv-3"))).is_err());
    assert!(resolve_task(&TaskRef::Only, &tasks, None).is_err());
    assert_eq!(
        resolve_task(&TaskRef::Index(3), &tasks, None),
        Ok(TaskId::new("t3"))
    );
    assert!(resolve_task(&TaskRef::Index(0), &tasks, None).is_err());
    assert!(resolve_task(&TaskRef::Index(4), &tasks, None).is_err());
}

#[test]
fn reject_commands_require_confirmation() {
    let tasks = vec![task("t1", "inv-1")];
    let invoice = InvoiceId::new("inv-1");

    let reject = to_command(
        parse_intent("reject").expect("parsed").expect("intent"),
        &tasks,
        Some(&invoice),
    )
    .expect("command");
    let approve = to_command(
        parse_intent("approve #1 ok").expect("parsed").expect("intent"),
        &tasks,
        Some(&invoice),
    )
    .expect("command");

    assert!(needs_confirmation(&reject));
    assert!(!needs_confirmation(&approve));
    assert!(is_affirmative(" YES "));
    assert!(!is_affirmative(""));
    assert!(!is_affirmative("n"));
}
