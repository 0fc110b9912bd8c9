use chrono::Local;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{check_id, parse_params, query_err, HandlerErr, IdParams};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportStudent {
    id: String,
    name: String,
    student_id: i64,
    status: String,
}

fn class_students(conn: &Connection, class_id: &str) -> Result<Vec<ReportStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, student_no, status FROM students WHERE class_id = ? ORDER BY name",
        )
        .map_err(query_err)?;
    stmt.query_map([class_id], |r| {
        Ok(ReportStudent {
            id: r.get(0)?,
            name: r.get(1)?,
            student_id: r.get(2)?,
            status: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

fn in_clause(ids: &[String]) -> String {
    vec!["?"; ids.len()].join(", ")
}

/// (date, is_present) pairs for a set of students.
fn attendance_rows(
    conn: &Connection,
    student_ids: &[String],
) -> Result<Vec<(String, bool)>, HandlerErr> {
    if student_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT date, is_present FROM attendance WHERE student_id IN ({})",
        in_clause(student_ids)
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    stmt.query_map(params_from_iter(student_ids.iter()), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

fn exam_marks(conn: &Connection, student_ids: &[String]) -> Result<Vec<f64>, HandlerErr> {
    if student_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT marks_obtained FROM exams WHERE student_id IN ({})",
        in_clause(student_ids)
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    stmt.query_map(params_from_iter(student_ids.iter()), |r| r.get::<_, f64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)
}

fn fee_figures(
    conn: &Connection,
    student_ids: &[String],
) -> Result<Vec<calc::FeeFigures>, HandlerErr> {
    if student_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT amount, amount_paid, status FROM fees WHERE student_id IN ({})",
        in_clause(student_ids)
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    stmt.query_map(params_from_iter(student_ids.iter()), |r| {
        Ok((
            r.get::<_, f64>(0)?,
            r.get::<_, f64>(1)?,
            r.get::<_, String>(2)?,
        ))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
    .map(|rows| {
        rows.into_iter()
            .map(|(amount, amount_paid, status)| calc::FeeFigures {
                amount,
                amount_paid,
                // Rows always carry a derived status; fall back to recomputing.
                status: calc::FeeStatus::parse(&status)
                    .unwrap_or_else(|| calc::compute_fee_status(amount, amount_paid).1),
            })
            .collect()
    })
}

fn class_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "class")?;
    let class = conn
        .query_row(
            "SELECT c.id, c.semester, c.class_mode, c.status, d.name, y.name
             FROM classes c
             JOIN departments d ON d.id = c.department_id
             JOIN academic_years y ON y.id = c.academic_year_id
             WHERE c.id = ?",
            [&p.id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "semester": r.get::<_, i64>(1)?,
                    "classMode": r.get::<_, String>(2)?,
                    "status": r.get::<_, String>(3)?,
                    "departmentName": r.get::<_, String>(4)?,
                    "academicYearName": r.get::<_, String>(5)?,
                }))
            },
        )
        .optional()
        .map_err(query_err)?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;

    let students = class_students(conn, &p.id)?;
    let ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();

    let attendance = attendance_rows(conn, &ids)?;
    let present = attendance.iter().filter(|(_, p)| *p).count();
    let today = Local::now().date_naive();
    let mut present_today = 0i64;
    let mut absent_today = 0i64;
    for (date, is_present) in &attendance {
        if calc::parse_day(date) == Some(today) {
            if *is_present {
                present_today += 1;
            } else {
                absent_today += 1;
            }
        }
    }

    let marks = exam_marks(conn, &ids)?;
    let exams = calc::exam_summary(&marks);
    let fees = calc::fee_totals(&fee_figures(conn, &ids)?);

    Ok(json!({
        "class": class,
        "studentCount": students.len(),
        "students": students,
        "attendance": {
            "averageAttendance": calc::rate(present, attendance.len()),
            "totalRecords": attendance.len(),
            "presentToday": present_today,
            "absentToday": absent_today,
        },
        "exams": exams,
        "fees": fees,
    }))
}

/// The identifier may be the internal key or the external school-issued
/// number; try the key first, then the number.
fn resolve_student(
    conn: &Connection,
    raw: &serde_json::Value,
) -> Result<Option<String>, HandlerErr> {
    if let Some(s) = raw.as_str() {
        let by_key = conn
            .query_row("SELECT id FROM students WHERE id = ?", [s], |r| {
                r.get::<_, String>(0)
            })
            .optional()
            .map_err(query_err)?;
        if by_key.is_some() {
            return Ok(by_key);
        }
        if let Ok(n) = s.trim().parse::<i64>() {
            return conn
                .query_row("SELECT id FROM students WHERE student_no = ?", [n], |r| {
                    r.get::<_, String>(0)
                })
                .optional()
                .map_err(query_err);
        }
        return Ok(None);
    }
    if let Some(n) = raw.as_i64() {
        return conn
            .query_row("SELECT id FROM students WHERE student_no = ?", [n], |r| {
                r.get::<_, String>(0)
            })
            .optional()
            .map_err(query_err);
    }
    Err(HandlerErr::bad_params("id must be a string or a number"))
}

fn student_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let raw = params
        .get("id")
        .ok_or_else(|| HandlerErr::bad_params("missing id"))?;
    let student_id = resolve_student(conn, raw)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let student = conn
        .query_row(
            "SELECT s.id, s.name, s.gender, s.parent_phone, s.phone, s.student_no, s.status,
                    s.created_at, c.id, c.semester, c.class_mode, c.status
             FROM students s
             JOIN classes c ON c.id = s.class_id
             WHERE s.id = ?",
            [&student_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "gender": r.get::<_, Option<String>>(2)?,
                    "parentPhone": r.get::<_, Option<String>>(3)?,
                    "phone": r.get::<_, Option<String>>(4)?,
                    "studentId": r.get::<_, i64>(5)?,
                    "status": r.get::<_, String>(6)?,
                    "createdAt": r.get::<_, String>(7)?,
                    "class": {
                        "id": r.get::<_, String>(8)?,
                        "semester": r.get::<_, i64>(9)?,
                        "classMode": r.get::<_, String>(10)?,
                        "status": r.get::<_, String>(11)?,
                    },
                }))
            },
        )
        .map_err(query_err)?;

    let ids = vec![student_id.clone()];
    let attendance = attendance_rows(conn, &ids)?;
    let present = attendance.iter().filter(|(_, p)| *p).count();
    let totals = calc::attendance_summary(present, attendance.len());

    let attendance_history: Vec<serde_json::Value> = attendance
        .iter()
        .map(|(date, is_present)| json!({ "date": date, "isPresent": is_present }))
        .collect();

    let exam_history = {
        let mut stmt = conn
            .prepare(
                "SELECT e.id, e.marks_obtained, e.date, t.name, c.course_name
                 FROM exams e
                 JOIN exam_types t ON t.id = e.exam_type_id
                 JOIN courses c ON c.id = e.course_id
                 WHERE e.student_id = ?
                 ORDER BY e.created_at DESC",
            )
            .map_err(query_err)?;
        stmt.query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "marksObtained": r.get::<_, f64>(1)?,
                "date": r.get::<_, Option<String>>(2)?,
                "examTypeName": r.get::<_, String>(3)?,
                "courseName": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?
    };

    let fee_history = {
        let mut stmt = conn
            .prepare(
                "SELECT id, amount, amount_paid, balance, status, finance_type, date
                 FROM fees WHERE student_id = ? ORDER BY created_at DESC",
            )
            .map_err(query_err)?;
        stmt.query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "amount": r.get::<_, f64>(1)?,
                "amountPaid": r.get::<_, f64>(2)?,
                "balance": r.get::<_, f64>(3)?,
                "status": r.get::<_, String>(4)?,
                "financeType": r.get::<_, Option<String>>(5)?,
                "date": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?
    };

    Ok(json!({
        "student": student,
        "attendance": {
            "records": attendance_history,
            "presentDays": totals.present_days,
            "absentDays": totals.absent_days,
            "percentage": totals.percentage,
        },
        "exams": exam_history,
        "fees": fee_history,
    }))
}

fn overview(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let counts = conn
        .query_row(
            "SELECT
               (SELECT COUNT(*) FROM students),
               (SELECT COUNT(*) FROM users WHERE title = 'teacher'),
               (SELECT COUNT(*) FROM users),
               (SELECT COUNT(*) FROM classes),
               (SELECT COUNT(*) FROM departments),
               (SELECT COUNT(*) FROM faculties),
               (SELECT COUNT(*) FROM courses),
               (SELECT COALESCE(SUM(amount), 0) FROM fees),
               (SELECT COALESCE(SUM(amount_paid), 0) FROM fees)",
            [],
            |r| {
                Ok(json!({
                    "students": r.get::<_, i64>(0)?,
                    "teachers": r.get::<_, i64>(1)?,
                    "users": r.get::<_, i64>(2)?,
                    "classes": r.get::<_, i64>(3)?,
                    "departments": r.get::<_, i64>(4)?,
                    "faculties": r.get::<_, i64>(5)?,
                    "courses": r.get::<_, i64>(6)?,
                    "totalFees": r.get::<_, f64>(7)?,
                    "collectedFees": r.get::<_, f64>(8)?,
                }))
            },
        )
        .map_err(query_err)?;

    let active_year = conn
        .query_row(
            "SELECT id, name, start_date, end_date FROM academic_years WHERE is_active = 1",
            [],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "startDate": r.get::<_, String>(2)?,
                    "endDate": r.get::<_, String>(3)?,
                }))
            },
        )
        .optional()
        .map_err(query_err)?;

    Ok(json!({
        "counts": counts,
        "activeYear": active_year,
    }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "reports.classReport" => class_report,
        "reports.studentReport" => student_report,
        "stats.overview" => overview,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match op(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
