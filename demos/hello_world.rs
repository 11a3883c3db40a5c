//! A minimal server with one inline route, an auth-guarded group and a
//! middleware that stops the chain early.

use tandem::middleware::Logger;
use tandem::{json, Context, Handler, HandlerResult, Routes, Server, ServerError};

struct RequireToken;

impl Handler for RequireToken {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> HandlerResult<'a> {
        Box::pin(async move {
            match ctx.header("Authorization") {
                Some(token) if token.starts_with("Bearer ") => {
                    let user = token.trim_start_matches("Bearer ").to_string();
                    ctx.set("user", user);
                    ctx.next().await
                }
                _ => Err(ServerError::Unauthorized("Authentication required".to_string())),
            }
        })
    }
}

fn main() {
    tandem::logging::init();

    let mut server = Server::new();
    server.middleware(Logger);

    server.get("/", |ctx| {
        Box::pin(async move {
            ctx.response.text("Hello, World!");
            Ok(())
        })
    });

    server.get("/users/:id", |ctx| {
        Box::pin(async move {
            let body = json!({ "id": ctx.param("id"), "x": ctx.query("x") });
            ctx.response.json(&body)?;
            Ok(())
        })
    });

    {
        let mut admin = server.group("/admin");
        admin.middleware(RequireToken);
        admin.get("/whoami", |ctx| {
            Box::pin(async move {
                let user: Option<String> = ctx.get("user");
                ctx.response.json(&json!({ "user": user }))?;
                Ok(())
            })
        });
    }

    server.listen("127.0.0.1:3000").expect("Server failed to start");
}
