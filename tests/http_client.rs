//! HTTP client against a mock dashboard platform

use std::io::{BufRead, BufReader, Write as _};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::{json, Map};
use teamgrant::PermissionLevel::{Admin, Read, Write};
use teamgrant::{
    ApiError, Error, ExternalGroupLinker, HttpResourceApi, Identity, LinkOutcome, MemorySink, NamedResource,
    PermissionGrant, PermissionMerger, PermissionUpdates, Principal, ReconciliationRequest, Reconciler, ResourceApi,
    ResourceKind, ResourceResolver,
};

fn client(server: &Server) -> HttpResourceApi {
    HttpResourceApi::new(&server.url(), "tok", Duration::from_secs(5), Duration::from_secs(2), true).unwrap()
}

/// A server that accepts connections and never answers, except that GETs get
/// `[]` when `answer_gets` is set
fn stalling_server(answer_gets: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let Ok(read_half) = stream.try_clone() else { continue };
            let mut reader = BufReader::new(read_half);
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            loop {
                let mut header = String::new();
                match reader.read_line(&mut header) {
                    Ok(0) | Err(_) => break,
                    Ok(_) if header == "\r\n" => break,
                    Ok(_) => {}
                }
            }
            if answer_gets && request_line.starts_with("GET ") {
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n[]",
                );
            } else {
                held.push(stream);
            }
        }
    });
    format!("http://{addr}")
}

fn impatient(url: &str) -> HttpResourceApi {
    HttpResourceApi::new(url, "tok", Duration::from_secs(1), Duration::from_secs(1), true).unwrap()
}

#[test]
fn test_team_lookup_is_exact_and_authenticated() {
    let mut server = Server::new();
    let m = server
        .mock("GET", "/api/teams/search")
        .match_query(Matcher::UrlEncoded("name".into(), "g-ro".into()))
        .match_header("authorization", "Bearer tok")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"totalCount":2,"teams":[{"id":3,"name":"g-ro-old"},{"id":7,"name":"g-ro"}],"page":1,"perPage":1000}"#)
        .create();

    let api = client(&server);
    assert_eq!(api.find_by_name(ResourceKind::Team, "g-ro").unwrap(), Some(Identity::Id(7)));
    m.assert();
}

#[test]
fn test_folder_lookup_ignores_partial_titles() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/api/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("type".into(), "dash-folder".into()),
            Matcher::UrlEncoded("query".into(), "acme".into()),
        ]))
        .with_status(200)
        .with_body(r#"[{"id":1,"uid":"aaa","title":"acme-legacy","type":"dash-folder"}]"#)
        .create();

    let api = client(&server);
    assert_eq!(api.find_by_name(ResourceKind::Folder, "acme").unwrap(), None);
}

#[test]
fn test_datasource_lookup_scans_the_list() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/api/datasources")
        .with_status(200)
        .with_body(r#"[{"id":1,"uid":"p1","name":"prom"},{"id":2,"uid":"l1","name":"loki"}]"#)
        .create();

    let api = client(&server);
    assert_eq!(api.find_by_name(ResourceKind::Datasource, "loki").unwrap(), Some(Identity::Uid("l1".into())));
}

#[test]
fn test_create_returns_identities() {
    let mut server = Server::new();
    let _team = server
        .mock("POST", "/api/teams")
        .match_body(Matcher::Json(json!({ "name": "g-ro" })))
        .with_status(200)
        .with_body(r#"{"message":"Team created","teamId":12}"#)
        .create();
    let _folder = server
        .mock("POST", "/api/folders")
        .match_body(Matcher::Json(json!({ "title": "acme" })))
        .with_status(200)
        .with_body(r#"{"id":4,"uid":"f-acme","title":"acme"}"#)
        .create();
    let _ds = server
        .mock("POST", "/api/datasources")
        .match_body(Matcher::PartialJson(json!({ "name": "prom", "type": "prometheus" })))
        .with_status(200)
        .with_body(r#"{"datasource":{"id":3,"uid":"ds-prom"},"id":3,"message":"Datasource added","name":"prom"}"#)
        .create();

    let api = client(&server);
    let none = Map::new();
    assert_eq!(api.create(ResourceKind::Team, "g-ro", &none).unwrap(), Identity::Id(12));
    assert_eq!(api.create(ResourceKind::Folder, "acme", &none).unwrap(), Identity::Uid("f-acme".into()));

    let mut attrs = Map::new();
    attrs.insert("type".into(), json!("prometheus"));
    assert_eq!(api.create(ResourceKind::Datasource, "prom", &attrs).unwrap(), Identity::Uid("ds-prom".into()));
}

#[test]
fn test_409_maps_to_already_exists() {
    let mut server = Server::new();
    let _m = server.mock("POST", "/api/teams").with_status(409).with_body(r#"{"message":"Team name taken"}"#).create();

    let err = client(&server).create(ResourceKind::Team, "g-ro", &Map::new()).unwrap_err();
    assert!(err.is_already_exists());
    assert!(!err.is_ambiguous());
}

#[test]
fn test_500_maps_to_status() {
    let mut server = Server::new();
    let _m = server.mock("POST", "/api/folders").with_status(500).with_body("boom").create();

    let err = client(&server).create(ResourceKind::Folder, "acme", &Map::new()).unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 500, .. }));
}

#[test]
fn test_404_maps_to_not_found() {
    let mut server = Server::new();
    let _m = server.mock("GET", "/api/folders/gone/permissions").with_status(404).with_body("folder not found").create();

    let err = client(&server).get_permissions(ResourceKind::Folder, &Identity::Uid("gone".into())).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_connection_refused_maps_to_connection() {
    let api =
        HttpResourceApi::new("http://127.0.0.1:1", "tok", Duration::from_secs(2), Duration::from_secs(1), true).unwrap();
    let err = api.find_by_name(ResourceKind::Team, "g-ro").unwrap_err();
    assert!(matches!(err, ApiError::Connection(_)));
    assert!(!err.is_ambiguous());
}

#[test]
fn test_silent_server_maps_to_timeout() {
    let api = impatient(&stalling_server(false));
    let err = api.find_by_name(ResourceKind::Team, "g-ro").unwrap_err();
    assert!(matches!(err, ApiError::Timeout(_)), "{err:?}");
    assert!(err.is_ambiguous());
}

#[test]
fn test_write_timeout_is_reported_ambiguous() {
    let api = Arc::new(impatient(&stalling_server(true)));
    let merger = PermissionMerger::new(api, Arc::new(MemorySink::new()));
    let folder = NamedResource::new(ResourceKind::Folder, "acme", Identity::Uid("fo1".into()));
    let updates: PermissionUpdates = [(Principal::Team(7), Read)].into_iter().collect();

    let err = merger.merge_permissions(&folder, &updates).unwrap_err();
    assert!(matches!(err, Error::PermissionWriteFailed { ambiguous: true, .. }), "{err:?}");
    assert!(err.is_retryable());
}

#[test]
fn test_unreadable_create_response_is_resolved_by_lookup() {
    let mut server = Server::new();
    let absent = server
        .mock("GET", "/api/teams/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"totalCount":0,"teams":[]}"#)
        .expect(1)
        .create();
    let create = server
        .mock("POST", "/api/teams")
        .with_status(200)
        .with_body(r#"{"message":"Team created"}"#)
        .expect(1)
        .create();
    let present = server
        .mock("GET", "/api/teams/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"totalCount":1,"teams":[{"id":21,"name":"g-ro"}]}"#)
        .create();

    let api = client(&server);
    let err = api.create(ResourceKind::Team, "g-other", &Map::new()).unwrap_err();
    assert!(matches!(err, ApiError::Unreadable(_)), "{err:?}");
    assert!(err.is_ambiguous());
    create.remove();

    let create = server
        .mock("POST", "/api/teams")
        .with_status(200)
        .with_body(r#"{"message":"Team created"}"#)
        .expect(1)
        .create();
    let resolver = ResourceResolver::new(Arc::new(api), Arc::new(MemorySink::new()));
    let resolved = resolver.resolve(ResourceKind::Team, "g-ro").unwrap();
    assert!(resolved.created);
    assert_eq!(resolved.identity(), &Identity::Id(21));
    absent.assert();
    create.assert();
    present.assert();
}

#[test]
fn test_folder_create_without_uid_is_unreadable() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/api/folders")
        .with_status(200)
        .with_body(r#"{"id":4,"title":"acme"}"#)
        .create();
    let err = client(&server).create(ResourceKind::Folder, "acme", &Map::new()).unwrap_err();
    assert!(matches!(err, ApiError::Unreadable(_)));
}

#[test]
fn test_permissions_read_and_full_replace_write() {
    let mut server = Server::new();
    let _get = server
        .mock("GET", "/api/datasources/uid/ds1/permissions")
        .with_status(200)
        .with_body(r#"{"datasourceId":3,"enabled":true,"permissions":[{"teamId":2,"permission":1},{"userId":9,"permission":4}]}"#)
        .create();
    let post = server
        .mock("POST", "/api/datasources/uid/ds1/permissions")
        .match_body(Matcher::Json(json!({
            "items": [
                { "teamId": 2, "permission": 2 },
                { "userId": 9, "permission": 4 },
                { "role": "Viewer", "permission": 1 }
            ]
        })))
        .with_status(200)
        .with_body(r#"{"message":"Datasource permissions updated"}"#)
        .create();

    let api = client(&server);
    let ds = Identity::Uid("ds1".into());
    let grants = api.get_permissions(ResourceKind::Datasource, &ds).unwrap();
    assert_eq!(grants, vec![PermissionGrant::team(2, Read), PermissionGrant::new(Principal::User(9), Admin)]);

    api.set_permissions(
        ResourceKind::Datasource,
        &ds,
        &[
            PermissionGrant::team(2, Write),
            PermissionGrant::new(Principal::User(9), Admin),
            PermissionGrant::new(Principal::Role("Viewer".into()), Read),
        ],
    )
    .unwrap();
    post.assert();
}

#[test]
fn test_group_already_added_is_idempotent() {
    let mut server = Server::new();
    let ok = server
        .mock("POST", "/api/teams/7/groups")
        .match_body(Matcher::Json(json!({ "groupId": "G1" })))
        .with_status(200)
        .with_body(r#"{"message":"Group added to Team"}"#)
        .create();

    let api = Arc::new(client(&server));
    let linker = ExternalGroupLinker::new(api.clone(), Arc::new(MemorySink::new()));
    assert_eq!(linker.link_group(7, "G1").unwrap(), LinkOutcome::Linked);
    ok.assert();
    ok.remove();

    let _dup = server
        .mock("POST", "/api/teams/7/groups")
        .with_status(400)
        .with_body(r#"{"message":"Group is already added to this team"}"#)
        .create();
    assert_eq!(linker.link_group(7, "G1").unwrap(), LinkOutcome::AlreadyLinked);
}

#[test]
fn test_reconcile_over_http() {
    let mut server = Server::new();
    let _find_folder = server
        .mock("GET", "/api/search")
        .match_query(Matcher::UrlEncoded("query".into(), "finance".into()))
        .with_status(200)
        .with_body("[]")
        .create();
    let _create_folder = server
        .mock("POST", "/api/folders")
        .with_status(200)
        .with_body(r#"{"id":1,"uid":"fin","title":"finance"}"#)
        .create();
    let _find_teams = server
        .mock("GET", "/api/teams/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"totalCount":0,"teams":[]}"#)
        .create();
    let mut creates = Vec::new();
    for (name, id) in [("finance-ro", 11), ("finance-rw", 12), ("finance-adm", 13)] {
        creates.push(
            server
                .mock("POST", "/api/teams")
                .match_body(Matcher::Json(json!({ "name": name })))
                .with_status(200)
                .with_body(json!({ "message": "Team created", "teamId": id }).to_string())
                .create(),
        );
    }
    let _read = server
        .mock("GET", "/api/folders/fin/permissions")
        .with_status(200)
        .with_body(r#"[{"role":"Editor","permission":2}]"#)
        .create();
    let write = server
        .mock("POST", "/api/folders/fin/permissions")
        .match_body(Matcher::Json(json!({
            "items": [
                { "teamId": 11, "permission": 1 },
                { "teamId": 12, "permission": 2 },
                { "teamId": 13, "permission": 4 },
                { "role": "Editor", "permission": 2 }
            ]
        })))
        .with_status(200)
        .with_body(r#"{"message":"Folder permissions updated"}"#)
        .create();

    let reconciler = Reconciler::new(Arc::new(client(&server)), Arc::new(MemorySink::new()));
    let result =
        reconciler.reconcile(&ReconciliationRequest::new("finance", "finance-ro", "finance-rw", "finance-adm")).unwrap();

    assert_eq!(result.folder_uid, "fin");
    assert_eq!((result.teams.readonly, result.teams.readwrite, result.teams.admin), (11, 12, 13));
    for m in &creates {
        m.assert();
    }
    write.assert();
}
