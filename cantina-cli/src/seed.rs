//! Demo-state seeder: a small school with a class, a few students and
//! the staff needed to run the counter.
use cantina_core::roster::cpf_check_digits;
use cantina_core::weekdays::MON_FRI_MASK;
use cantina_core::{
    AccountId, CantinaState, Catalog, Category, ItemId, MenuItem, Role, ServiceClosure,
};
use chrono::NaiveDate;

/// Derive a valid CPF from a sequence number.
fn cpf_for(n: u32) -> String {
    let mut base = [0u8; 9];
    let mut rest = 100_000_000 + u64::from(n) * 7 + 13;
    for slot in base.iter_mut().rev() {
        *slot = (rest % 10) as u8;
        rest /= 10;
    }
    let (d1, d2) = cpf_check_digits(&base);
    let mut cpf: String = base.iter().map(|d| char::from(b'0' + d)).collect();
    cpf.push(char::from(b'0' + d1));
    cpf.push(char::from(b'0' + d2));
    cpf
}

/// The demo menu written next to the seeded state.
#[must_use]
pub fn demo_catalog() -> Catalog {
    Catalog {
        categories: vec![
            Category {
                slug: "almoco".to_string(),
                name: "Almoço".to_string(),
            },
            Category {
                slug: "bebidas".to_string(),
                name: "Bebidas".to_string(),
            },
        ],
        items: vec![
            MenuItem {
                id: ItemId(1),
                name: "Prato do dia".to_string(),
                description: "Arroz, feijão e mistura".to_string(),
                active: true,
                category: Some("almoco".to_string()),
            },
            MenuItem {
                id: ItemId(2),
                name: "Prato vegetariano".to_string(),
                description: String::new(),
                active: true,
                category: Some("almoco".to_string()),
            },
            MenuItem {
                id: ItemId(3),
                name: "Suco de caju".to_string(),
                description: String::new(),
                active: true,
                category: Some("bebidas".to_string()),
            },
        ],
    }
}

/// Build a populated demo state. Returns the state and the staff
/// account that operates the counter.
pub fn demo_state(year: u16) -> (CantinaState, AccountId) {
    let mut state = CantinaState::default();
    let roster = &mut state.roster;

    let staff = roster
        .register_account("Seu Jorge", &cpf_for(0), Role::Staff)
        .expect("seed CPFs are valid");
    roster
        .register_account("Dona Marta", &cpf_for(1), Role::Admin)
        .expect("seed CPFs are valid");

    let class_a = roster
        .add_class("3A", Some(year), MON_FRI_MASK)
        .expect("seed class names are unique");
    // 3B has lunch Mon/Wed/Fri only.
    let class_b = roster
        .add_class("3B", Some(year), 0b0010101)
        .expect("seed class names are unique");

    let students = [
        ("Ana Souza", class_a),
        ("Bia Lima", class_a),
        ("Caio Prado", class_b),
        ("Davi Rocha", class_b),
    ];
    for (i, (name, class)) in students.iter().enumerate() {
        let id = roster
            .register_account(name, &cpf_for(10 + i as u32), Role::Student)
            .expect("seed CPFs are valid");
        roster.enroll(*class, id).expect("seed accounts enroll");
    }

    state.calendar.add_closure(ServiceClosure {
        date: NaiveDate::from_ymd_opt(i32::from(year), 12, 25).expect("fixed date"),
        label: "Natal".to_string(),
        annual: true,
    });

    (state, staff)
}
